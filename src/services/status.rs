//! Latest-value status store shared with readers
//!
//! The frame pipeline is the only writer. Readers (HTTP handlers, dashboards)
//! take a clone of the current `Arc` and never hold the lock past that, so
//! neither side blocks the other beyond a pointer swap.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregate zone counts for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OccupancyCounts {
    pub total: usize,
    pub free: usize,
    pub occupied: usize,
}

impl OccupancyCounts {
    /// Counts from a zone total and an occupied count (`free = total - occupied`)
    pub fn from_occupied(total: usize, occupied: usize) -> Self {
        let occupied = occupied.min(total);
        Self { total, free: total - occupied, occupied }
    }
}

/// Immutable snapshot handed to readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub total: u64,
    pub free: u64,
    pub occupied: u64,
    pub timestamp: DateTime<Utc>,
    /// Index of the frame that produced this snapshot (0 before the first frame)
    pub frame: u64,
    /// Whether any detected class currently counts as an obstacle
    #[serde(default)]
    pub any_class: bool,
}

impl StatusSnapshot {
    fn empty() -> Self {
        Self { total: 0, free: 0, occupied: 0, timestamp: Utc::now(), frame: 0, any_class: false }
    }
}

pub struct StatusPublisher {
    snapshot: RwLock<Arc<StatusSnapshot>>,
    preview: RwLock<Option<Bytes>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(StatusSnapshot::empty())), preview: RwLock::new(None) }
    }

    /// Replace the snapshot; negative inputs are stored as 0
    pub fn publish(&self, total: i64, free: i64, occupied: i64) {
        self.store(total, free, occupied, None);
    }

    /// Publish engine counts for `frame`
    pub fn publish_counts(&self, counts: OccupancyCounts, frame: u64) {
        self.store(counts.total as i64, counts.free as i64, counts.occupied as i64, Some(frame));
    }

    /// Publish the any-class mode, keeping the current counts
    pub fn publish_any_class(&self, enabled: bool) {
        let mut guard = self.snapshot.write();
        if guard.any_class != enabled {
            let mut next = StatusSnapshot::clone(&guard);
            next.any_class = enabled;
            next.timestamp = Utc::now();
            *guard = Arc::new(next);
        }
    }

    fn store(&self, total: i64, free: i64, occupied: i64, frame: Option<u64>) {
        let mut guard = self.snapshot.write();
        let next = Arc::new(StatusSnapshot {
            total: total.max(0) as u64,
            free: free.max(0) as u64,
            occupied: occupied.max(0) as u64,
            timestamp: Utc::now(),
            frame: frame.unwrap_or(guard.frame),
            any_class: guard.any_class,
        });
        *guard = next;
    }

    /// Latest snapshot
    pub fn read(&self) -> Arc<StatusSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn publish_preview(&self, bytes: Bytes) {
        *self.preview.write() = Some(bytes);
    }

    /// Latest preview artifact, if one was ever published
    pub fn read_preview(&self) -> Option<Bytes> {
        self.preview.read().clone()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
