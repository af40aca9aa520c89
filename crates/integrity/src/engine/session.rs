// One open document's integrity state.
//
// A session owns everything that used to be ambient: the block index, the
// dirty tracker, the context-hash memo cache, the hash engine and the
// checkpoint scheduler. It is created when a document opens and dropped when
// it closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use scriptum_common::types::AnnotationScanData;

use crate::cache::DecodeCache;
use crate::checkpoint::{CheckpointResult, CheckpointScheduler, EditOperation};
use crate::config::{IntegrityConfig, SchedulerConfig};
use crate::hash::{HashEngine, HashEngineError};
use crate::index::{block_annotation_map, BlockIndex, BlockInput, DirtyRegionTracker};
use crate::scanner::{DocumentStateProvider, IntegrityScanner};

use super::metrics::{LargeDocPerformanceMetrics, ScanTimings};

pub struct DocumentSession {
    doc_id: Uuid,
    engine: HashEngine,
    index: BlockIndex,
    tracker: DirtyRegionTracker,
    hash_memo: DecodeCache<String>,
    scheduler: CheckpointScheduler,
    scheduler_config: SchedulerConfig,
    timings: ScanTimings,
    /// Structural edits landed since the index was last rebuilt.
    index_stale: bool,
}

impl DocumentSession {
    pub fn open(doc_id: Uuid, config: &IntegrityConfig) -> Result<Self, HashEngineError> {
        let engine = HashEngine::from_config(&config.hash)?;
        Ok(Self {
            doc_id,
            engine,
            index: BlockIndex::default(),
            tracker: DirtyRegionTracker::new(),
            hash_memo: DecodeCache::new(config.cache.to_cache_config()),
            scheduler: CheckpointScheduler::new(config.compare),
            scheduler_config: config.scheduler,
            timings: ScanTimings::default(),
            index_stale: true,
        })
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn engine(&self) -> HashEngine {
        self.engine
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn tracker(&self) -> &DirtyRegionTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &CheckpointScheduler {
        &self.scheduler
    }

    pub fn hash_memo(&self) -> &DecodeCache<String> {
        &self.hash_memo
    }

    /// Rebuild the block index (and tracker associations) from the provider.
    pub fn load_from_provider<P>(&mut self, provider: &P) -> Result<()>
    where
        P: DocumentStateProvider + ?Sized,
    {
        let order = provider.block_order().context("loading block order for index")?;
        let annotations = provider.annotations().context("loading annotations for index")?;
        self.rebuild_index(&order, &annotations);
        Ok(())
    }

    pub fn rebuild_index(&mut self, order: &[String], annotations: &[AnnotationScanData]) {
        let blocks: Vec<BlockInput> =
            order.iter().map(|id| BlockInput::top_level(id.clone())).collect();
        self.index = BlockIndex::build(&blocks, &block_annotation_map(annotations));
        self.tracker.seed_from_index(&self.index);
        self.index_stale = false;
        debug!(doc_id = %self.doc_id, blocks = self.index.len(), "block index rebuilt");
    }

    // ── Edits ──────────────────────────────────────────────────────

    /// Record an edit the editor just applied: mark touched blocks and
    /// annotations dirty and feed the scheduler.
    pub fn apply_edit(&mut self, op: &EditOperation) {
        self.apply_edit_at(op, Instant::now());
    }

    pub fn apply_edit_at(&mut self, op: &EditOperation, now: Instant) {
        match op {
            EditOperation::AnnotationCreate { anno_id, .. } => {
                for block_id in op.touched_blocks() {
                    self.index.add_annotation(block_id, anno_id);
                    self.tracker.register_block_annotation(block_id, anno_id);
                }
                self.tracker.mark_annotation_dirty(anno_id);
            }
            EditOperation::AnnotationDelete { anno_id } => {
                self.tracker.mark_annotation_dirty(anno_id);
                for block_id in self.index.remove_annotation_everywhere(anno_id) {
                    self.tracker.unregister_block_annotation(&block_id, anno_id);
                }
            }
            _ => self.tracker.mark_blocks_dirty(op.touched_blocks()),
        }
        if op.is_structural() {
            self.mark_neighbourhood_dirty(op);
            self.index_stale = true;
        }
        self.scheduler.record_operation_at(op, now);
    }

    /// Chains enclosing a structural edit may change adjacency without any
    /// of their own blocks being touched. Positions come from the index as
    /// of the last rebuild; a block it has never seen marks every
    /// multi-block annotation.
    fn mark_neighbourhood_dirty(&mut self, op: &EditOperation) {
        let mut affected = Vec::new();
        for block_id in op.neighbourhood_blocks() {
            match self.index.position_of(block_id) {
                Some(position) => affected.extend(self.index.annotations_spanning(position)),
                None => {
                    affected.extend(self.index.multi_block_annotations());
                    break;
                }
            }
        }
        for anno_id in &affected {
            self.tracker.mark_annotation_dirty(anno_id);
        }
    }

    // ── Checkpoints ────────────────────────────────────────────────

    pub fn checkpoint<P>(&mut self, provider: &P) -> Result<CheckpointResult>
    where
        P: DocumentStateProvider + ?Sized,
    {
        self.checkpoint_at(provider, Instant::now())
    }

    pub fn checkpoint_at<P>(&mut self, provider: &P, now: Instant) -> Result<CheckpointResult>
    where
        P: DocumentStateProvider + ?Sized,
    {
        if self.index_stale {
            if let Err(error) = self.load_from_provider(provider) {
                self.scheduler.record_failure("index reload", &error);
                return Err(error);
            }
        }

        let mut scanner = IntegrityScanner::with_memo(self.engine, &mut self.hash_memo);
        let result = self.scheduler.run_checkpoint_at(
            &mut scanner,
            provider,
            &mut self.tracker,
            self.index.len(),
            now,
        )?;
        if let CheckpointResult::Completed(outcome) = &result {
            self.timings.observe(outcome.kind, outcome.duration);
        }
        Ok(result)
    }

    /// True once edits are pending and the document has been quiet for the
    /// configured idle period.
    pub fn is_checkpoint_due_at(&self, now: Instant) -> bool {
        self.scheduler.is_idle_due_at(self.scheduler_config.idle_checkpoint_after(), now)
    }

    pub fn metrics(&self) -> LargeDocPerformanceMetrics {
        LargeDocPerformanceMetrics {
            block_count: self.index.len(),
            annotation_count: self.index.annotation_count(),
            dirty: self.tracker.stats(),
            timings: self.timings,
            cache: self.hash_memo.stats(),
            scheduler: self.scheduler.stats(),
            deferred_checkpoints: 0,
        }
    }
}

// ── Shared access ──────────────────────────────────────────────────

/// A session shared between the editor task and the idle checkpoint loop.
/// At most one checkpoint runs at a time; overlapping requests are dropped.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<DocumentSession>>,
    deferred: Arc<AtomicU64>,
}

impl SharedSession {
    pub fn new(session: DocumentSession) -> Self {
        Self { inner: Arc::new(Mutex::new(session)), deferred: Arc::new(AtomicU64::new(0)) }
    }

    pub async fn lock(&self) -> MutexGuard<'_, DocumentSession> {
        self.inner.lock().await
    }

    /// Checkpoint unless the session is busy, in which case the request is
    /// dropped and reported as `Deferred`.
    pub fn try_checkpoint<P>(&self, provider: &P) -> Result<CheckpointResult>
    where
        P: DocumentStateProvider + ?Sized,
    {
        match self.inner.try_lock() {
            Ok(mut session) => session.checkpoint(provider),
            Err(_) => {
                self.deferred.fetch_add(1, Ordering::Relaxed);
                debug!("checkpoint already in flight; request deferred");
                Ok(CheckpointResult::Deferred)
            }
        }
    }

    pub fn deferred_count(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    pub async fn metrics(&self) -> LargeDocPerformanceMetrics {
        let mut metrics = self.inner.lock().await.metrics();
        metrics.deferred_checkpoints = self.deferred_count();
        metrics
    }
}
