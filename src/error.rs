use crate::lifecycle::{ProcessEvent, ProcessState};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Launch configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Secrets provisioning error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("State machine error: {0}")]
    Transition(#[from] TransitionError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Fatal errors raised while composing a launch configuration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Malformed size '{value}': expected <number><KB|MB|GB>")]
    MalformedSize { value: String },

    #[error(
        "Insufficient disk space for search cache: configured {cache_size} ({cache_bytes} bytes), usable {usable_bytes} bytes on {path}"
    )]
    InsufficientDiskSpace {
        cache_size: String,
        cache_bytes: u64,
        usable_bytes: u64,
        path: PathBuf,
    },

    #[error("Contributor {contributor} failed: {details}")]
    Contributor { contributor: String, details: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secrets provisioning failed: {0}")]
    Secrets(#[from] SecretsError),
}

impl ConfigurationError {
    pub fn contributor<S: Into<String>, D: Into<String>>(contributor: S, details: D) -> Self {
        Self::Contributor {
            contributor: contributor.into(),
            details: details.into(),
        }
    }

    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Fatal errors while reading or building keystore material
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Failed to read keystore {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid keystore {name}: {details}")]
    Keystore { name: String, details: String },

    #[error("Invalid certificate {name}: {details}")]
    Certificate { name: String, details: String },

    #[error("Missing password for keystore {name}")]
    MissingPassword { name: String },
}

impl SecretsError {
    pub fn keystore<S: Into<String>, D: ToString>(name: S, details: D) -> Self {
        Self::Keystore {
            name: name.into(),
            details: details.to_string(),
        }
    }
}

/// Errors from starting, stopping or observing the OS process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process not configured: a launch configuration is required before start")]
    NotConfigured,

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {pid} did not terminate within {timeout_ms}ms")]
    TerminationTimeout { pid: u32, timeout_ms: u64 },

    #[error("Reboot limit reached after {reboots} restarts")]
    RebootLimitExceeded { reboots: u32 },

    #[error("Process is already running with pid {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("Secure settings command failed: {details}")]
    SecureSettings { details: String },

    #[error("Cluster request failed: {0}")]
    Cluster(#[from] HealthCheckError),
}

/// Programming errors in the lifecycle state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("No transition defined for event {event:?} in state {state:?}")]
    Undefined {
        state: ProcessState,
        event: ProcessEvent,
    },
}

/// Transient failures of a single REST call; never escalated directly
#[derive(Error, Debug, Clone)]
pub enum HealthCheckError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("No subscribers are listening")]
    NoSubscribers,

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl SupervisorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Configuration and secrets errors abort a launch before anything is spawned
    pub fn is_fatal_launch_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::Configuration(_) | SupervisorError::Secrets(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
