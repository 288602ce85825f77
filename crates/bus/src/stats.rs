use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters for one bus instance.
#[derive(Debug, Default)]
pub struct BusStats {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub dispatched: AtomicU64,
    pub handler_failures: AtomicU64,
}

/// Point-in-time copy of [`BusStats`] for serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
    /// Events waiting in the queue when the snapshot was taken.
    pub queued: usize,
    pub capacity: usize,
}

impl BusStats {
    pub fn snapshot(&self, queued: usize, capacity: usize) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            queued,
            capacity,
        }
    }
}
