use super::counter::BoundedFailureCounter;
use super::types::{ProcessEvent, ProcessState};
use crate::error::TransitionError;
use crate::events::{EventBus, SupervisorEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Which counter guards a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Health failures while the process is still starting
    StartupFailures,
    /// Health failures after the process was available once
    TransientFailures,
    /// Restarts of a terminated process
    Reboots,
}

/// Outcome of looking up `(state, event)` in the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Goto(ProcessState),
    /// Explicitly ignored pair, state is left untouched
    Ignore,
    /// Next state depends on the guard counter: `pass` while it admits, `fail` otherwise
    Guarded {
        guard: Guard,
        pass: ProcessState,
        fail: ProcessState,
    },
}

/// The transition table. Pure, no side effects.
pub fn transition(state: ProcessState, event: ProcessEvent) -> Result<Rule, TransitionError> {
    use ProcessEvent as E;
    use ProcessState as S;

    let rule = match (state, event) {
        (S::AwaitingConfiguration, E::Prepared) => Rule::Goto(S::Prepared),
        // insecure or trusted startup skips the preparation step
        (S::AwaitingConfiguration, E::Started) => Rule::Goto(S::Starting),
        (S::AwaitingConfiguration, E::HealthFailed) => Rule::Ignore,

        (S::Prepared, E::Started) => Rule::Goto(S::Starting),
        (S::Prepared, E::Stopped | E::Terminated) => Rule::Goto(S::Terminated),

        (S::Starting, E::HealthFailed) => Rule::Guarded {
            guard: Guard::StartupFailures,
            pass: S::Starting,
            fail: S::Failed,
        },
        (S::Starting, E::HealthOk) => Rule::Goto(S::Available),
        (S::Starting, E::Stopped | E::Terminated) => Rule::Goto(S::Terminated),

        (S::Available, E::HealthOk) => Rule::Goto(S::Available),
        (S::Available, E::HealthFailed) => Rule::Goto(S::NotResponding),
        (S::Available, E::Stopped | E::Terminated) => Rule::Goto(S::Terminated),
        (S::Available, E::Remove) => Rule::Goto(S::Removing),

        (S::NotResponding, E::HealthFailed) => Rule::Guarded {
            guard: Guard::TransientFailures,
            pass: S::NotResponding,
            fail: S::Failed,
        },
        (S::NotResponding, E::HealthOk) => Rule::Goto(S::Available),
        (S::NotResponding, E::Stopped | E::Terminated) => Rule::Goto(S::Terminated),

        (S::Failed, E::HealthFailed) => Rule::Ignore,
        (S::Failed, E::HealthOk) => Rule::Goto(S::Available),
        (S::Failed, E::Stopped | E::Terminated) => Rule::Goto(S::Terminated),

        (S::Terminated, E::Started) => Rule::Guarded {
            guard: Guard::Reboots,
            pass: S::Starting,
            fail: S::Terminated,
        },
        (S::Terminated, E::HealthFailed | E::Stopped | E::Terminated) => Rule::Ignore,

        (S::Removing, E::HealthOk) => Rule::Ignore,
        (S::Removing, E::HealthFailed) => Rule::Goto(S::Failed),
        (S::Removing, E::Stopped) => Rule::Goto(S::Removed),

        (S::Removed, E::Reset) => Rule::Goto(S::AwaitingConfiguration),
        (S::Removed, E::Stopped) => Rule::Ignore,

        (state, event) => return Err(TransitionError::Undefined { state, event }),
    };

    Ok(rule)
}

/// Default thresholds for the three guards
#[derive(Debug, Clone, Copy)]
pub struct FailureThresholds {
    pub startup: u32,
    pub transient: u32,
    pub reboot: u32,
}

impl Default for FailureThresholds {
    fn default() -> Self {
        Self {
            startup: 5,
            transient: 3,
            reboot: 3,
        }
    }
}

#[derive(Debug)]
struct Guards {
    startup: BoundedFailureCounter,
    transient: BoundedFailureCounter,
    reboot: BoundedFailureCounter,
}

impl Guards {
    fn new(thresholds: FailureThresholds) -> Self {
        Self {
            startup: BoundedFailureCounter::zero_based(thresholds.startup),
            transient: BoundedFailureCounter::zero_based(thresholds.transient),
            reboot: BoundedFailureCounter::zero_based(thresholds.reboot),
        }
    }

    /// Evaluate a guard, incrementing its counter as a side effect
    fn admit(&self, guard: Guard) -> bool {
        match guard {
            Guard::StartupFailures => {
                self.startup.increment();
                !self.startup.exceeded()
            }
            Guard::TransientFailures => {
                self.transient.increment();
                !self.transient.exceeded()
            }
            // Reboots are checked before counting; an exhausted budget blocks the restart
            Guard::Reboots => {
                if self.reboot.exceeded() {
                    false
                } else {
                    self.reboot.increment();
                    true
                }
            }
        }
    }

    fn on_enter(&self, from: ProcessState, to: ProcessState) {
        match to {
            ProcessState::Available => {
                self.transient.reset();
                self.reboot.reset();
            }
            ProcessState::Starting if from != ProcessState::Starting => {
                self.startup.reset();
            }
            _ => {}
        }
    }
}

/// Result of an accepted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ProcessState,
    pub to: ProcessState,
    pub event: ProcessEvent,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Lifecycle state machine of one supervised process
pub struct LifecycleStateMachine {
    node: String,
    state: Mutex<ProcessState>,
    guards: Guards,
    event_bus: Option<Arc<EventBus>>,
}

impl LifecycleStateMachine {
    pub fn new(node: impl Into<String>) -> Self {
        Self::with_thresholds(node, FailureThresholds::default())
    }

    pub fn with_thresholds(node: impl Into<String>, thresholds: FailureThresholds) -> Self {
        Self {
            node: node.into(),
            state: Mutex::new(ProcessState::AwaitingConfiguration),
            guards: Guards::new(thresholds),
            event_bus: None,
        }
    }

    /// Publish every state change on the given bus
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn current(&self) -> ProcessState {
        *self.state.lock()
    }

    /// Whether a `Started` event would currently be accepted
    pub fn can_start(&self) -> bool {
        let state = self.state.lock();
        match *state {
            ProcessState::Terminated => !self.guards.reboot.exceeded(),
            other => matches!(
                transition(other, ProcessEvent::Started),
                Ok(Rule::Goto(ProcessState::Starting))
            ),
        }
    }

    pub fn reboot_count(&self) -> u32 {
        self.guards.reboot.count()
    }

    /// Apply an event atomically
    pub fn fire(&self, event: ProcessEvent) -> Result<Transition, TransitionError> {
        self.apply(event).map_err(|e| {
            error!(node = %self.node, "Rejected lifecycle event: {}", e);
            e
        })
    }

    /// Apply an event only if the current state defines it
    ///
    /// Lookup and transition happen under one lock, so a concurrent event cannot
    /// turn a defined event into a rejected one.
    pub fn fire_if_defined(&self, event: ProcessEvent) -> Option<Transition> {
        match self.apply(event) {
            Ok(t) => Some(t),
            Err(e) => {
                debug!(node = %self.node, "Skipped lifecycle event: {}", e);
                None
            }
        }
    }

    fn apply(&self, event: ProcessEvent) -> Result<Transition, TransitionError> {
        let transition = {
            let mut state = self.state.lock();
            let from = *state;
            let rule = transition(from, event)?;
            let to = match rule {
                Rule::Goto(next) => next,
                Rule::Ignore => from,
                Rule::Guarded { guard, pass, fail } => {
                    if self.guards.admit(guard) {
                        pass
                    } else {
                        fail
                    }
                }
            };
            if rule != Rule::Ignore {
                self.guards.on_enter(from, to);
            }
            *state = to;
            Transition { from, to, event }
        };

        if transition.changed() {
            info!(
                node = %self.node,
                "Process state {} -> {} ({})",
                transition.from, transition.to, transition.event
            );
            self.publish(&transition);
        } else if event == ProcessEvent::Started && transition.to == ProcessState::Terminated {
            warn!(
                node = %self.node,
                "Restart refused, reboot limit of {} reached",
                self.guards.reboot.threshold()
            );
        } else {
            debug!(node = %self.node, "Process state {} unchanged by {}", transition.to, event);
        }

        Ok(transition)
    }

    fn publish(&self, transition: &Transition) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(SupervisorEvent::StateChanged {
                node: self.node.clone(),
                from: transition.from,
                to: transition.to,
                trigger: transition.event,
                timestamp: SystemTime::now(),
            });
        }
    }
}
