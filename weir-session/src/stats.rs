//! Per-payload capture statistics

use crate::frame::PayloadId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Snapshot of the counters for one payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoStats {
    pub proto: PayloadId,
    pub count: u64,
    pub err_count: u64,
    pub last: Option<SystemTime>,
}

#[derive(Default)]
struct Slot {
    count: AtomicU64,
    err_count: AtomicU64,
    last_unix: AtomicU64, // seconds since epoch; 0 = never
}

/// Lock-free counters, one slot per [`PayloadId`].
pub struct SessionStats {
    slots: [Slot; PayloadId::SLOTS],
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
        }
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Record one successfully matched layer.
    pub fn record(&self, proto: PayloadId) {
        let slot = &self.slots[proto as usize];
        slot.count.fetch_add(1, Ordering::Relaxed);
        slot.last_unix.store(Self::now_unix(), Ordering::Relaxed);
    }

    /// Record a validation failure in a layer.
    pub fn record_err(&self, proto: PayloadId) {
        self.slots[proto as usize]
            .err_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters for one payload type.
    pub fn get(&self, proto: PayloadId) -> ProtoStats {
        let slot = &self.slots[proto as usize];
        let last_unix = slot.last_unix.load(Ordering::Relaxed);
        ProtoStats {
            proto,
            count: slot.count.load(Ordering::Relaxed),
            err_count: slot.err_count.load(Ordering::Relaxed),
            last: (last_unix != 0).then(|| UNIX_EPOCH + Duration::from_secs(last_unix)),
        }
    }

    /// Snapshot every payload type with at least one event.
    pub fn snapshot(&self) -> Vec<ProtoStats> {
        PayloadId::ALL
            .iter()
            .map(|&p| self.get(p))
            .filter(|s| s.count != 0 || s.err_count != 0)
            .collect()
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
