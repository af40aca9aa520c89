// Checkpoint scheduler: decides when a checkpoint runs a full scan.
//
// accumulating --run_checkpoint--> checkpointing --ok/err--> accumulating
//
// Full scan when any of:
//   - the document is small (block_count <= dev_fullscan_max_blocks)
//   - structural ops since the last full scan >= dev_structural_ops_fullscan_every
//   - time since the last full scan >= dev_idle_fullscan_every_ms
//   - the previous comparison found a dirty-tracking coverage gap
//
// A full-scan checkpoint always compares against the current dirty region,
// so every full scan doubles as a dirty-tracking self-check.

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DevComparePolicy;
use crate::index::DirtyRegionTracker;
use crate::scanner::{DocumentStateProvider, IntegrityScanner, ScanComparison, ScanKind, ScanReport};

use super::ops::EditOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Accumulating,
    Checkpointing,
}

/// Inputs to the pure full-scan decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullScanInputs {
    pub block_count: usize,
    pub structural_ops_since_last_full_scan: u32,
    /// Time since the last full scan (or since the scheduler started).
    pub idle: Duration,
}

/// Pure decision: should this checkpoint be a full scan?
pub fn should_run_full_scan_now(policy: &DevComparePolicy, inputs: &FullScanInputs) -> bool {
    inputs.block_count <= policy.dev_fullscan_max_blocks
        || inputs.structural_ops_since_last_full_scan >= policy.dev_structural_ops_fullscan_every
        || inputs.idle >= policy.idle_fullscan_every()
}

#[derive(Debug, Clone)]
pub struct CheckpointOutcome {
    pub kind: ScanKind,
    pub report: ScanReport,
    /// Present for full-scan checkpoints.
    pub comparison: Option<ScanComparison>,
    pub dirty_blocks: usize,
    pub duration: Duration,
}

impl CheckpointOutcome {
    pub fn missed_by_dirty(&self) -> usize {
        self.comparison.as_ref().map_or(0, |comparison| comparison.missed_by_dirty.len())
    }
}

#[derive(Debug, Clone)]
pub enum CheckpointResult {
    Completed(CheckpointOutcome),
    /// Another checkpoint for this document was already in flight.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStats {
    pub checkpoints: u64,
    pub full_scans: u64,
    pub dirty_scans: u64,
    pub failures: u64,
    pub coverage_gaps: u64,
    pub operations_recorded: u64,
    pub structural_ops_since_full_scan: u32,
    pub ops_since_checkpoint: u64,
}

#[derive(Debug)]
pub struct CheckpointScheduler {
    policy: DevComparePolicy,
    state: CheckpointState,
    structural_ops_since_full_scan: u32,
    ops_since_checkpoint: u64,
    last_full_scan_at: Instant,
    last_activity_at: Option<Instant>,
    force_full_scan: bool,
    stats: SchedulerStats,
}

impl CheckpointScheduler {
    pub fn new(policy: DevComparePolicy) -> Self {
        Self::new_at(policy, Instant::now())
    }

    pub fn new_at(policy: DevComparePolicy, now: Instant) -> Self {
        Self {
            policy,
            state: CheckpointState::Accumulating,
            structural_ops_since_full_scan: 0,
            ops_since_checkpoint: 0,
            last_full_scan_at: now,
            last_activity_at: None,
            force_full_scan: false,
            stats: SchedulerStats::default(),
        }
    }

    pub fn policy(&self) -> &DevComparePolicy {
        &self.policy
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// Set when the last comparison found a coverage gap; cleared by a clean one.
    pub fn full_scan_forced(&self) -> bool {
        self.force_full_scan
    }

    pub fn has_pending_changes(&self) -> bool {
        self.ops_since_checkpoint > 0
    }

    // ── Recording ──────────────────────────────────────────────────

    pub fn record_operation(&mut self, op: &EditOperation) {
        self.record_operation_at(op, Instant::now());
    }

    pub fn record_operation_at(&mut self, op: &EditOperation, now: Instant) {
        self.ops_since_checkpoint += 1;
        self.stats.operations_recorded += 1;
        if op.is_structural() {
            self.structural_ops_since_full_scan =
                self.structural_ops_since_full_scan.saturating_add(1);
        }
        self.last_activity_at = Some(now);
    }

    // ── Decisions ──────────────────────────────────────────────────

    pub fn full_scan_inputs_at(&self, block_count: usize, now: Instant) -> FullScanInputs {
        FullScanInputs {
            block_count,
            structural_ops_since_last_full_scan: self.structural_ops_since_full_scan,
            idle: now.checked_duration_since(self.last_full_scan_at).unwrap_or(Duration::ZERO),
        }
    }

    pub fn should_run_full_scan_now(&self, block_count: usize) -> bool {
        self.should_run_full_scan_at(block_count, Instant::now())
    }

    pub fn should_run_full_scan_at(&self, block_count: usize, now: Instant) -> bool {
        self.force_full_scan
            || should_run_full_scan_now(&self.policy, &self.full_scan_inputs_at(block_count, now))
    }

    /// True once edits are pending and nothing has landed for `quiet`.
    pub fn is_idle_due_at(&self, quiet: Duration, now: Instant) -> bool {
        self.has_pending_changes()
            && self
                .last_activity_at
                .and_then(|last| now.checked_duration_since(last))
                .is_some_and(|elapsed| elapsed >= quiet)
    }

    // ── Running ────────────────────────────────────────────────────

    pub fn run_checkpoint<P>(
        &mut self,
        scanner: &mut IntegrityScanner<'_>,
        provider: &P,
        tracker: &mut DirtyRegionTracker,
        block_count: usize,
    ) -> Result<CheckpointResult>
    where
        P: DocumentStateProvider + ?Sized,
    {
        self.run_checkpoint_at(scanner, provider, tracker, block_count, Instant::now())
    }

    /// Run one checkpoint. On error the scheduler returns to accumulating,
    /// counters and dirty state are left untouched, and the error propagates.
    pub fn run_checkpoint_at<P>(
        &mut self,
        scanner: &mut IntegrityScanner<'_>,
        provider: &P,
        tracker: &mut DirtyRegionTracker,
        block_count: usize,
        now: Instant,
    ) -> Result<CheckpointResult>
    where
        P: DocumentStateProvider + ?Sized,
    {
        if self.state == CheckpointState::Checkpointing {
            return Ok(CheckpointResult::Deferred);
        }
        self.state = CheckpointState::Checkpointing;

        let kind = if self.should_run_full_scan_at(block_count, now) {
            ScanKind::Full
        } else {
            ScanKind::Dirty
        };
        let region = tracker.get_dirty_region();
        let started = Instant::now();

        let scanned = match kind {
            ScanKind::Full => {
                scanner
                    .compare_scans(provider, &region)
                    .map(|comparison| (comparison.full.clone(), Some(comparison)))
            }
            ScanKind::Dirty => scanner.dirty_scan(provider, &region).map(|report| (report, None)),
        };

        let (report, comparison) = match scanned {
            Ok(scanned) => scanned,
            Err(error) => {
                self.record_failure(&format!("{kind} scan"), &error);
                return Err(error);
            }
        };

        let outcome = CheckpointOutcome {
            kind,
            report,
            comparison,
            dirty_blocks: region.block_ids.len(),
            duration: started.elapsed(),
        };
        tracker.clear();
        self.reset_after_checkpoint(&outcome, now);
        self.state = CheckpointState::Accumulating;

        debug!(
            %kind,
            mismatches = outcome.report.mismatches.len(),
            dirty_blocks = outcome.dirty_blocks,
            "checkpoint completed"
        );
        Ok(CheckpointResult::Completed(outcome))
    }

    /// Count a checkpoint that failed at `stage`. Dirty state is left for
    /// the retry.
    pub fn record_failure(&mut self, stage: &str, error: &anyhow::Error) {
        self.state = CheckpointState::Accumulating;
        self.stats.failures += 1;
        warn!(stage, error = %format!("{error:#}"), "checkpoint failed; dirty state kept");
    }

    fn reset_after_checkpoint(&mut self, outcome: &CheckpointOutcome, now: Instant) {
        self.ops_since_checkpoint = 0;
        self.stats.checkpoints += 1;
        match outcome.kind {
            ScanKind::Full => {
                self.stats.full_scans += 1;
                self.structural_ops_since_full_scan = 0;
                self.last_full_scan_at = now;
            }
            ScanKind::Dirty => self.stats.dirty_scans += 1,
        }

        if let Some(comparison) = &outcome.comparison {
            if comparison.has_coverage_gap() {
                self.stats.coverage_gaps += 1;
                self.force_full_scan = true;
                info!(
                    missed = comparison.missed_by_dirty.len(),
                    "coverage gap recorded; next checkpoint will full-scan"
                );
            } else {
                self.force_full_scan = false;
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            structural_ops_since_full_scan: self.structural_ops_since_full_scan,
            ops_since_checkpoint: self.ops_since_checkpoint,
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashEngine;
    use crate::index::DirtyRegion;
    use scriptum_common::types::{AnnotationScanData, SpanScanData};
    use std::cell::Cell;
    use std::collections::HashMap;

    fn policy() -> DevComparePolicy {
        DevComparePolicy {
            dev_fullscan_max_blocks: 100,
            dev_structural_ops_fullscan_every: 3,
            dev_idle_fullscan_every_ms: 10_000,
        }
    }

    fn structural() -> EditOperation {
        EditOperation::BlockDelete { block_id: "b".into() }
    }

    fn text_edit(block: &str) -> EditOperation {
        EditOperation::TextEdit { block_id: block.into(), offset: 0, delete: 0, insert: "x".into() }
    }

    struct Doc {
        texts: HashMap<String, String>,
        annotations: Vec<AnnotationScanData>,
        fail: Cell<bool>,
    }

    impl Doc {
        fn new() -> Self {
            let engine = HashEngine::default();
            let mut texts = HashMap::new();
            let mut annotations = Vec::new();
            for i in 0..3 {
                let block = format!("b{i}");
                texts.insert(block.clone(), format!("text {i}"));
                annotations.push(AnnotationScanData {
                    anno_id: format!("a{i}"),
                    spans: vec![SpanScanData {
                        span_id: format!("s{i}"),
                        block_id: block.clone(),
                        stored_context_hash: Some(
                            engine.context_hash(&block, &format!("text {i}")),
                        ),
                    }],
                    chain: None,
                });
            }
            Self { texts, annotations, fail: Cell::new(false) }
        }
    }

    impl DocumentStateProvider for Doc {
        fn annotations(&self) -> Result<Vec<AnnotationScanData>> {
            if self.fail.get() {
                anyhow::bail!("storage unavailable");
            }
            Ok(self.annotations.clone())
        }

        fn span_text(&self, block_id: &str, _span_id: &str) -> Result<Option<String>> {
            Ok(self.texts.get(block_id).cloned())
        }

        fn block_order(&self) -> Result<Vec<String>> {
            Ok(vec!["b0".into(), "b1".into(), "b2".into()])
        }
    }

    fn completed(result: CheckpointResult) -> CheckpointOutcome {
        match result {
            CheckpointResult::Completed(outcome) => outcome,
            CheckpointResult::Deferred => panic!("unexpected deferral"),
        }
    }

    // ── should_run_full_scan_now ───────────────────────────────────

    #[test]
    fn small_documents_always_full_scan() {
        let inputs = FullScanInputs {
            block_count: 5,
            structural_ops_since_last_full_scan: 0,
            idle: Duration::ZERO,
        };
        assert!(should_run_full_scan_now(&policy(), &inputs));
    }

    #[test]
    fn large_documents_need_ops_or_idle() {
        let p = policy();
        let mut inputs = FullScanInputs { block_count: 10_000, ..FullScanInputs::default() };
        assert!(!should_run_full_scan_now(&p, &inputs));

        inputs.structural_ops_since_last_full_scan = 2;
        assert!(!should_run_full_scan_now(&p, &inputs));
        inputs.structural_ops_since_last_full_scan = 3;
        assert!(should_run_full_scan_now(&p, &inputs));

        inputs.structural_ops_since_last_full_scan = 0;
        inputs.idle = Duration::from_millis(9_999);
        assert!(!should_run_full_scan_now(&p, &inputs));
        inputs.idle = Duration::from_millis(10_000);
        assert!(should_run_full_scan_now(&p, &inputs));
    }

    #[test]
    fn only_structural_ops_count_toward_threshold() {
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        for _ in 0..10 {
            scheduler.record_operation_at(&text_edit("b0"), t0);
        }
        assert!(!scheduler.should_run_full_scan_at(10_000, t0));
        for _ in 0..3 {
            scheduler.record_operation_at(&structural(), t0);
        }
        assert!(scheduler.should_run_full_scan_at(10_000, t0));
        assert_eq!(scheduler.stats().operations_recorded, 13);
    }

    // ── run_checkpoint ─────────────────────────────────────────────

    #[test]
    fn dirty_checkpoint_clears_tracker_and_counters() {
        let doc = Doc::new();
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let mut tracker = DirtyRegionTracker::new();
        tracker.register_block_annotation("b1", "a1");
        tracker.mark_block_dirty("b1");
        scheduler.record_operation_at(&text_edit("b1"), t0);

        let mut scanner = IntegrityScanner::new(HashEngine::default());
        let outcome = completed(
            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 10_000, t0).unwrap(),
        );

        assert_eq!(outcome.kind, ScanKind::Dirty);
        assert_eq!(outcome.report.annotation_ids, vec!["a1"]);
        assert!(outcome.comparison.is_none());
        assert!(tracker.is_clean());
        assert!(!scheduler.has_pending_changes());
        assert_eq!(scheduler.state(), CheckpointState::Accumulating);
    }

    #[test]
    fn full_checkpoint_resets_structural_counter() {
        let doc = Doc::new();
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let mut tracker = DirtyRegionTracker::new();
        for _ in 0..3 {
            scheduler.record_operation_at(&structural(), t0);
        }

        let mut scanner = IntegrityScanner::new(HashEngine::default());
        let outcome = completed(
            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 10_000, t0).unwrap(),
        );
        assert_eq!(outcome.kind, ScanKind::Full);
        assert!(outcome.comparison.is_some());
        assert_eq!(scheduler.stats().structural_ops_since_full_scan, 0);
        assert_eq!(scheduler.stats().full_scans, 1);
    }

    #[test]
    fn failed_scan_keeps_dirty_state_and_counters() {
        let doc = Doc::new();
        doc.fail.set(true);
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let mut tracker = DirtyRegionTracker::new();
        tracker.mark_block_dirty("b2");
        scheduler.record_operation_at(&structural(), t0);

        let mut scanner = IntegrityScanner::new(HashEngine::default());
        // Small doc forces a full scan, which hits the failing provider.
        let err = scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 3, t0).unwrap_err();
        assert!(format!("{err:#}").contains("storage unavailable"));

        assert_eq!(scheduler.state(), CheckpointState::Accumulating);
        assert!(tracker.is_block_dirty("b2"));
        assert!(scheduler.has_pending_changes());
        let stats = scheduler.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.checkpoints, 0);
        assert_eq!(stats.structural_ops_since_full_scan, 1);

        // Retry succeeds once the provider recovers.
        doc.fail.set(false);
        completed(scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 3, t0).unwrap());
        assert!(tracker.is_clean());
    }

    #[test]
    fn coverage_gap_forces_sticky_full_scans() {
        let mut doc = Doc::new();
        // b0 edited without being marked dirty.
        doc.texts.insert("b0".into(), "tampered".into());

        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let mut tracker = DirtyRegionTracker::new();
        tracker.mark_block_dirty("b2");
        let mut scanner = IntegrityScanner::new(HashEngine::default());

        let outcome = completed(

            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 3, t0).unwrap(),

        );
        assert_eq!(outcome.missed_by_dirty(), 1);
        assert!(scheduler.full_scan_forced());
        assert_eq!(scheduler.stats().coverage_gaps, 1);

        // Large document, no ops: the gap alone makes this a full scan.
        assert!(scheduler.should_run_full_scan_at(10_000, t0));
        let again = completed(
            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 10_000, t0).unwrap(),
        );
        assert_eq!(again.kind, ScanKind::Full);
        // Still mismatched and still not dirty: gap persists.
        assert!(scheduler.full_scan_forced());

        // Marking the block dirty closes the gap.
        tracker.mark_block_dirty("b0");
        let closed = completed(
            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 10_000, t0).unwrap(),
        );
        assert_eq!(closed.missed_by_dirty(), 0);
        assert!(!scheduler.full_scan_forced());
        assert!(!scheduler.should_run_full_scan_at(10_000, t0));
    }

    #[test]
    fn idle_due_needs_pending_changes_and_quiet_period() {
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let quiet = Duration::from_millis(500);
        assert!(!scheduler.is_idle_due_at(quiet, t0 + Duration::from_secs(5)));

        scheduler.record_operation_at(&text_edit("b0"), t0);
        assert!(!scheduler.is_idle_due_at(quiet, t0 + Duration::from_millis(499)));
        assert!(scheduler.is_idle_due_at(quiet, t0 + Duration::from_millis(500)));
    }

    #[test]
    fn empty_dirty_region_checkpoint_is_clean() {
        let doc = Doc::new();
        let t0 = Instant::now();
        let mut scheduler = CheckpointScheduler::new_at(policy(), t0);
        let mut tracker = DirtyRegionTracker::new();
        let mut scanner = IntegrityScanner::new(HashEngine::default());
        let outcome = completed(
            scheduler.run_checkpoint_at(&mut scanner, &doc, &mut tracker, 10_000, t0).unwrap(),
        );
        assert_eq!(outcome.kind, ScanKind::Dirty);
        assert!(outcome.report.is_clean());
        assert_eq!(DirtyRegion::default(), tracker.get_dirty_region());
    }
}
