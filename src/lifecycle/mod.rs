mod counter;
mod machine;
mod types;

pub use counter::BoundedFailureCounter;
pub use machine::{transition, FailureThresholds, Guard, LifecycleStateMachine, Rule, Transition};
pub use types::{ProcessEvent, ProcessState};
