use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Fixed-capacity FIFO of text lines; the oldest line is evicted when full
pub struct LineBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    stats: LineBufferStats,
}

/// Counters for buffer activity
#[derive(Debug, Default)]
pub struct LineBufferStats {
    /// Total lines pushed
    pub lines_pushed: AtomicU64,
    /// Lines dropped to make room
    pub lines_evicted: AtomicU64,
}

/// Snapshot of buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBufferStatsSnapshot {
    pub lines_pushed: u64,
    pub lines_evicted: u64,
    pub lines_held: usize,
}

impl LineBuffer {
    /// Create a buffer holding at most `capacity` lines
    ///
    /// A capacity of zero is raised to one.
    ///
    /// # Example
    /// ```
    /// use searchnode::ring_buffer::LineBuffer;
    ///
    /// let buffer = LineBuffer::new(2);
    /// buffer.push("a");
    /// buffer.push("b");
    /// buffer.push("c");
    /// assert_eq!(buffer.snapshot(), vec!["b".to_string(), "c".to_string()]);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            stats: LineBufferStats::default(),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
            self.stats.lines_evicted.fetch_add(1, Ordering::Relaxed);
            trace!("Line buffer full, evicted oldest line");
        }
        lines.push_back(line.into());
        self.stats.lines_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn stats(&self) -> LineBufferStatsSnapshot {
        LineBufferStatsSnapshot {
            lines_pushed: self.stats.lines_pushed.load(Ordering::Relaxed),
            lines_evicted: self.stats.lines_evicted.load(Ordering::Relaxed),
            lines_held: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_eviction() {
        let buffer = LineBuffer::new(3);
        for line in ["a", "b", "c", "d"] {
            buffer.push(line);
        }
        assert_eq!(buffer.snapshot(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let buffer = LineBuffer::new(3);
        buffer.push("a");
        let snapshot = buffer.snapshot();
        buffer.push("b");
        assert_eq!(snapshot, vec!["a"]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_stats() {
        let buffer = LineBuffer::new(2);
        for line in ["a", "b", "c", "d", "e"] {
            buffer.push(line);
        }
        assert_eq!(
            buffer.stats(),
            LineBufferStatsSnapshot {
                lines_pushed: 5,
                lines_evicted: 3,
                lines_held: 2,
            }
        );
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let buffer = LineBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_concurrent_writers() {
        let buffer = Arc::new(LineBuffer::new(50));
        let writers: Vec<_> = (0..2)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.push(format!("{}-{}", w, i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.stats().lines_pushed, 200);
    }
}
