pub mod app;
pub mod compose;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod node;
pub mod process;
pub mod ring_buffer;
pub mod secrets;

pub use app::{ComponentState, NodeOrchestrator, ShutdownReason};
pub use compose::{BuildParams, ConfigurationComposer, Contributor, LaunchConfiguration};
pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use events::{EventBus, EventFilter, EventReceiver, SupervisorEvent};
pub use health::{ClusterHealthClient, HealthMonitor, RestClusterClient};
pub use lifecycle::{BoundedFailureCounter, LifecycleStateMachine, ProcessEvent, ProcessState};
pub use node::ManagedProcess;
pub use process::{LogCapture, ProcessInfo, ProcessSupervisor};
pub use ring_buffer::LineBuffer;
pub use secrets::{CertificateSource, FilesystemCertificateSource, SecretsProvisioner};
