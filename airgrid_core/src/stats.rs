//! Per-device counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by a device's pool threads.
#[derive(Debug, Default)]
pub struct DeviceStats {
    rounds_completed: AtomicU64,
    scripts_executed: AtomicU64,
    scripts_skipped: AtomicU64,
}

/// Point-in-time copy of [`DeviceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Rounds whose intra-device barriers this device has passed
    pub rounds_completed: u64,

    /// Assignments whose script ran and published a result
    pub scripts_executed: u64,

    /// Assignments claimed for a location nobody in the neighbourhood tracks
    pub scripts_skipped: u64,
}

impl DeviceStats {
    pub(crate) fn round_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn script_executed(&self) {
        self.scripts_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn script_skipped(&self) {
        self.scripts_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Rounds completed so far.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Acquire)
    }

    /// Copies the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rounds_completed: self.rounds_completed(),
            scripts_executed: self.scripts_executed.load(Ordering::Relaxed),
            scripts_skipped: self.scripts_skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = DeviceStats::default();
        stats.round_completed();
        stats.script_executed();
        stats.script_executed();
        stats.script_skipped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rounds_completed, 1);
        assert_eq!(snapshot.scripts_executed, 2);
        assert_eq!(snapshot.scripts_skipped, 1);
        assert_eq!(stats.rounds_completed(), 1);
    }
}
