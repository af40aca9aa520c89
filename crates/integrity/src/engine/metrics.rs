// Per-document performance counters for large-document dashboards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::checkpoint::SchedulerStats;
use crate::index::DirtyTrackerStats;
use crate::scanner::ScanKind;

/// Count + cumulative duration per scan kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanTimings {
    pub full_scan_count: u64,
    pub full_scan_sum_us: u64,
    pub dirty_scan_count: u64,
    pub dirty_scan_sum_us: u64,
    pub last_scan_kind: Option<ScanKind>,
    pub last_scan_us: Option<u64>,
}

impl ScanTimings {
    pub fn observe(&mut self, kind: ScanKind, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        match kind {
            ScanKind::Full => {
                self.full_scan_count += 1;
                self.full_scan_sum_us = self.full_scan_sum_us.saturating_add(micros);
            }
            ScanKind::Dirty => {
                self.dirty_scan_count += 1;
                self.dirty_scan_sum_us = self.dirty_scan_sum_us.saturating_add(micros);
            }
        }
        self.last_scan_kind = Some(kind);
        self.last_scan_us = Some(micros);
    }

    pub fn mean_full_scan_us(&self) -> Option<u64> {
        (self.full_scan_count > 0).then(|| self.full_scan_sum_us / self.full_scan_count)
    }

    pub fn mean_dirty_scan_us(&self) -> Option<u64> {
        (self.dirty_scan_count > 0).then(|| self.dirty_scan_sum_us / self.dirty_scan_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LargeDocPerformanceMetrics {
    pub block_count: usize,
    pub annotation_count: usize,
    pub dirty: DirtyTrackerStats,
    pub timings: ScanTimings,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    /// Checkpoint requests dropped because one was already running.
    pub deferred_checkpoints: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_accumulate_per_kind() {
        let mut timings = ScanTimings::default();
        assert_eq!(timings.mean_full_scan_us(), None);

        timings.observe(ScanKind::Full, Duration::from_micros(300));
        timings.observe(ScanKind::Full, Duration::from_micros(100));
        timings.observe(ScanKind::Dirty, Duration::from_micros(7));

        assert_eq!(timings.full_scan_count, 2);
        assert_eq!(timings.mean_full_scan_us(), Some(200));
        assert_eq!(timings.mean_dirty_scan_us(), Some(7));
        assert_eq!(timings.last_scan_kind, Some(ScanKind::Dirty));
        assert_eq!(timings.last_scan_us, Some(7));
    }
}
