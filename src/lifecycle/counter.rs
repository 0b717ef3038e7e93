use std::sync::atomic::{AtomicU32, Ordering};

/// Saturating failure counter used as a transition guard.
///
/// A zero-based counter counts failures (the first failure brings it to 1),
/// a one-based counter counts attempts (the first attempt is already 1).
#[derive(Debug)]
pub struct BoundedFailureCounter {
    count: AtomicU32,
    initial: u32,
    threshold: u32,
}

impl BoundedFailureCounter {
    /// Counter starting at 0, exceeded once `threshold` increments happened
    pub fn zero_based(threshold: u32) -> Self {
        Self::new(0, threshold)
    }

    /// Counter starting at 1
    pub fn one_based(threshold: u32) -> Self {
        Self::new(1, threshold)
    }

    fn new(initial: u32, threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(initial),
            initial,
            threshold,
        }
    }

    /// Increment without overflowing, returning the new count
    pub fn increment(&self) -> u32 {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(1))
            })
            .unwrap_or(u32::MAX);
        previous.saturating_add(1)
    }

    pub fn reset(&self) {
        self.count.store(self.initial, Ordering::Release);
    }

    pub fn exceeded(&self) -> bool {
        self.count() >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
