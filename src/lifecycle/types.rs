use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible state of one supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    AwaitingConfiguration,
    Prepared,
    Starting,
    Available,
    NotResponding,
    Failed,
    Terminated,
    Removing,
    Removed,
}

/// Inputs to the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessEvent {
    Prepared,
    Started,
    Stopped,
    Terminated,
    HealthOk,
    HealthFailed,
    HealthGreen,
    Remove,
    Reset,
}

impl ProcessState {
    /// States in which an OS process is expected to exist
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting
                | ProcessState::Available
                | ProcessState::NotResponding
                | ProcessState::Failed
                | ProcessState::Removing
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::AwaitingConfiguration => "AWAITING_CONFIGURATION",
            ProcessState::Prepared => "PREPARED",
            ProcessState::Starting => "STARTING",
            ProcessState::Available => "AVAILABLE",
            ProcessState::NotResponding => "NOT_RESPONDING",
            ProcessState::Failed => "FAILED",
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Removing => "REMOVING",
            ProcessState::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ProcessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
