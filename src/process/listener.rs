use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives exit notifications for a supervised process
pub trait ProcessListener: Send + Sync {
    /// The process exited; `None` when it was killed by a signal
    fn on_exit(&self, exit_code: Option<i32>);
}

/// Detachable slot holding the listener of the current run
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<Mutex<Option<Arc<dyn ProcessListener>>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: Arc<dyn ProcessListener>) {
        *self.inner.lock() = Some(listener);
    }

    /// Remove the listener; later notifications are dropped
    pub fn detach(&self) -> bool {
        self.inner.lock().take().is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Deliver an exit notification if a listener is still attached
    pub fn notify_exit(&self, exit_code: Option<i32>) -> bool {
        // clone out so the callback runs without holding the slot lock
        let listener = self.inner.lock().clone();
        match listener {
            Some(listener) => {
                listener.on_exit(exit_code);
                true
            }
            None => {
                debug!("Exit notification dropped, listener detached");
                false
            }
        }
    }
}
