mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::{build_params, default_composer, NodeOrchestrator};
pub use startup::dry_run;
pub use types::{ComponentState, ShutdownReason};
