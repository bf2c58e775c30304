//! Sequence counter shared by the logs of one shard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic index source.
///
/// Logs use `increment() - 1` as the index of the entry being written, so
/// [`Counter::current`] is always one past the highest index handed out.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new(start: u64) -> Self {
        Self {
            value: AtomicU64::new(start),
        }
    }

    /// Returns the current value without changing it.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Atomically increments the counter and returns the new value.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocates the next log index.
    pub(crate) fn next_index(&self) -> u64 {
        self.increment() - 1
    }
}
