use crate::error::EventBusError;
use crate::lifecycle::{ProcessEvent, ProcessState};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events emitted by the supervisor for observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// The lifecycle state machine accepted a state change
    StateChanged {
        node: String,
        from: ProcessState,
        to: ProcessState,
        trigger: ProcessEvent,
        timestamp: SystemTime,
    },
    /// The OS process was spawned
    ProcessStarted {
        node: String,
        pid: u32,
        timestamp: SystemTime,
    },
    /// The OS process exited
    ProcessExited {
        node: String,
        exit_code: Option<i32>,
        timestamp: SystemTime,
    },
    /// A configuration contributor reported a warning
    ConfigurationWarning { node: String, message: String },
    /// The observed cluster-manager flag flipped
    LeaderChanged {
        node: String,
        leader: bool,
        timestamp: SystemTime,
    },
}

impl SupervisorEvent {
    pub fn node(&self) -> &str {
        match self {
            SupervisorEvent::StateChanged { node, .. }
            | SupervisorEvent::ProcessStarted { node, .. }
            | SupervisorEvent::ProcessExited { node, .. }
            | SupervisorEvent::ConfigurationWarning { node, .. }
            | SupervisorEvent::LeaderChanged { node, .. } => node,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SupervisorEvent::StateChanged {
                node,
                from,
                to,
                trigger,
                ..
            } => format!("{}: {} -> {} on {}", node, from, to, trigger),
            SupervisorEvent::ProcessStarted { node, pid, .. } => {
                format!("{}: process started with pid {}", node, pid)
            }
            SupervisorEvent::ProcessExited {
                node, exit_code, ..
            } => match exit_code {
                Some(code) => format!("{}: process exited with code {}", node, code),
                None => format!("{}: process terminated by signal", node),
            },
            SupervisorEvent::ConfigurationWarning { node, message } => {
                format!("{}: configuration warning: {}", node, message)
            }
            SupervisorEvent::LeaderChanged { node, leader, .. } => {
                if *leader {
                    format!("{}: sees an elected cluster manager", node)
                } else {
                    format!("{}: lost sight of the cluster manager", node)
                }
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SupervisorEvent::StateChanged { .. } => "state_changed",
            SupervisorEvent::ProcessStarted { .. } => "process_started",
            SupervisorEvent::ProcessExited { .. } => "process_exited",
            SupervisorEvent::ConfigurationWarning { .. } => "configuration_warning",
            SupervisorEvent::LeaderChanged { .. } => "leader_changed",
        }
    }
}

/// Event bus backed by a broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: SupervisorEvent) -> Result<usize, EventBusError> {
        if let SupervisorEvent::ConfigurationWarning { node, message } = &event {
            warn!(node = %node, "Configuration warning: {}", message);
        }

        self.sender
            .send(event)
            .map_err(|_| EventBusError::NoSubscribers)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Nodes(Vec<String>),
}

impl EventFilter {
    pub fn matches(&self, event: &SupervisorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Nodes(nodes) => nodes.iter().any(|n| n == event.node()),
        }
    }
}

/// Filtered view on the event bus
pub struct EventReceiver {
    receiver: broadcast::Receiver<SupervisorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(bus: &EventBus, filter: EventFilter, name: impl Into<String>) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.into(),
        }
    }

    /// Receive the next event passing the filter. Lagging skips missed events.
    pub async fn recv(&mut self) -> Result<SupervisorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

/// Log every event until the bus closes; used by the binary
pub async fn log_events(mut receiver: EventReceiver) {
    while let Ok(event) = receiver.recv().await {
        info!(event_type = event.event_type(), "{}", event.description());
    }
}
