// Integrity scanner: recompute anchors and compare against stored hashes.
//
// Per annotation:
//   spans  current text missing -> dirty_missed_span
//          stored hash differs  -> hash_mismatch
//   chain  policy broken        -> chain_violation (hash not checked)
//          stored hash differs  -> hash_mismatch
//
// `compare_scans` runs both scan kinds over the same dirty region. Anything
// the full scan flags on an annotation the dirty scan never looked at is a
// dirty-tracking coverage gap, reported separately as `missed_by_dirty`.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use scriptum_common::types::{AnnotationScanData, CompareMismatch};

use crate::cache::DecodeCache;
use crate::hash::HashEngine;
use crate::index::DirtyRegion;

pub mod chain;
pub mod provider;

pub use chain::{validate_chain_policy, BlockOrder, ChainViolation};
pub use provider::DocumentStateProvider;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Full,
    Dirty,
}

impl ScanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Dirty => "dirty",
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    pub kind: ScanKind,
    pub mismatches: Vec<CompareMismatch>,
    /// Annotations this scan verified, sorted.
    pub annotation_ids: Vec<String>,
    pub spans_checked: usize,
    pub chains_checked: usize,
}

impl ScanReport {
    fn empty(kind: ScanKind) -> Self {
        Self {
            kind,
            mismatches: Vec::new(),
            annotation_ids: Vec::new(),
            spans_checked: 0,
            chains_checked: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanComparison {
    pub full: ScanReport,
    pub dirty: ScanReport,
    /// Full-scan mismatches on annotations the dirty scan never covered.
    pub missed_by_dirty: Vec<CompareMismatch>,
}

impl ScanComparison {
    pub fn has_coverage_gap(&self) -> bool {
        !self.missed_by_dirty.is_empty()
    }
}

/// Scans one document. Optionally memoizes context hashes in a decode cache
/// keyed by block, span and exact text.
pub struct IntegrityScanner<'c> {
    engine: HashEngine,
    memo: Option<&'c mut DecodeCache<String>>,
}

impl IntegrityScanner<'static> {
    pub fn new(engine: HashEngine) -> Self {
        Self { engine, memo: None }
    }
}

impl<'c> IntegrityScanner<'c> {
    pub fn with_memo(engine: HashEngine, memo: &'c mut DecodeCache<String>) -> Self {
        Self { engine, memo: Some(memo) }
    }

    pub fn full_scan<P>(&mut self, provider: &P) -> Result<ScanReport>
    where
        P: DocumentStateProvider + ?Sized,
    {
        let annotations = provider.annotations().context("loading annotations for full scan")?;
        let report = self.scan(ScanKind::Full, provider, annotations)?;
        debug!(
            annotations = report.annotation_ids.len(),
            mismatches = report.mismatches.len(),
            "full scan finished"
        );
        Ok(report)
    }

    pub fn dirty_scan<P>(&mut self, provider: &P, dirty: &DirtyRegion) -> Result<ScanReport>
    where
        P: DocumentStateProvider + ?Sized,
    {
        let touched = dirty.touched_blocks();
        if touched.is_empty() && dirty.annotation_ids.is_empty() {
            return Ok(ScanReport::empty(ScanKind::Dirty));
        }
        let mut annotations = if touched.is_empty() {
            Vec::new()
        } else {
            provider
                .annotations_in_blocks(&touched)
                .with_context(|| {
                    format!("loading annotations for {} dirty block(s)", touched.len())
                })?
        };

        // Annotations marked dirty on their own (created, or near a
        // structural edit) may not touch any dirty block.
        let loaded: BTreeSet<String> =
            annotations.iter().map(|anno| anno.anno_id.clone()).collect();
        let extra: BTreeSet<&str> = dirty
            .annotation_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !loaded.contains(*id))
            .collect();
        if !extra.is_empty() {
            let all = provider.annotations().context("loading dirty annotations")?;
            annotations
                .extend(all.into_iter().filter(|anno| extra.contains(anno.anno_id.as_str())));
        }

        let report = self.scan(ScanKind::Dirty, provider, annotations)?;
        debug!(
            dirty_blocks = touched.len(),
            annotations = report.annotation_ids.len(),
            mismatches = report.mismatches.len(),
            "dirty scan finished"
        );
        Ok(report)
    }

    pub fn compare_scans<P>(&mut self, provider: &P, dirty: &DirtyRegion) -> Result<ScanComparison>
    where
        P: DocumentStateProvider + ?Sized,
    {
        let full = self.full_scan(provider)?;
        let dirty_report = self.dirty_scan(provider, dirty)?;

        let covered: BTreeSet<&str> =
            dirty_report.annotation_ids.iter().map(String::as_str).collect();
        let missed_by_dirty: Vec<CompareMismatch> = full
            .mismatches
            .iter()
            .filter(|mismatch| !covered.contains(mismatch.anno_id.as_str()))
            .cloned()
            .collect();

        if !missed_by_dirty.is_empty() {
            warn!(
                missed = missed_by_dirty.len(),
                dirty_blocks = dirty.block_ids.len(),
                "full scan found mismatches outside the dirty region; dirty tracking missed an edit"
            );
        }

        Ok(ScanComparison { full, dirty: dirty_report, missed_by_dirty })
    }

    fn scan<P>(
        &mut self,
        kind: ScanKind,
        provider: &P,
        annotations: Vec<AnnotationScanData>,
    ) -> Result<ScanReport>
    where
        P: DocumentStateProvider + ?Sized,
    {
        let order = provider.block_order().context("loading block order")?;
        let order = BlockOrder::new(&order);

        let mut report = ScanReport::empty(kind);
        let mut seen = BTreeSet::new();
        for anno in &annotations {
            if !seen.insert(anno.anno_id.clone()) {
                continue;
            }
            self.verify_annotation(anno, &order, provider, &mut report)?;
        }
        report.annotation_ids = seen.into_iter().collect();
        Ok(report)
    }

    fn verify_annotation<P>(
        &mut self,
        anno: &AnnotationScanData,
        order: &BlockOrder,
        provider: &P,
        report: &mut ScanReport,
    ) -> Result<()>
    where
        P: DocumentStateProvider + ?Sized,
    {
        for span in &anno.spans {
            report.spans_checked += 1;
            let text = provider
                .span_text(&span.block_id, &span.span_id)
                .with_context(|| {
                    format!("reading span {} in block {}", span.span_id, span.block_id)
                })?;

            let Some(text) = text else {
                report.mismatches.push(CompareMismatch::dirty_missed_span(
                    &anno.anno_id,
                    &span.span_id,
                    format!("span text no longer present in block {}", span.block_id),
                ));
                continue;
            };

            if let Some(stored) = &span.stored_context_hash {
                let current = self.context_hash(&span.block_id, &span.span_id, &text);
                if &current != stored {
                    report.mismatches.push(CompareMismatch::hash_mismatch(
                        &anno.anno_id,
                        Some(&span.span_id),
                        format!("context hash {} != stored {}", short(&current), short(stored)),
                    ));
                }
            }
        }

        if let Some(chain) = &anno.chain {
            report.chains_checked += 1;
            if let Err(violation) = validate_chain_policy(&chain.chain, order) {
                report
                    .mismatches
                    .push(CompareMismatch::chain_violation(&anno.anno_id, violation.to_string()));
                return Ok(());
            }
            if let Some(stored) = &chain.stored_chain_hash {
                let current = self.engine.compute_chain_hash(&chain.chain).hash;
                if &current != stored {
                    report.mismatches.push(CompareMismatch::hash_mismatch(
                        &anno.anno_id,
                        None,
                        format!("chain hash {} != stored {}", short(&current), short(stored)),
                    ));
                }
            }
        }
        Ok(())
    }

    fn context_hash(&mut self, block_id: &str, span_id: &str, text: &str) -> String {
        let engine = self.engine;
        match self.memo.as_deref_mut() {
            Some(memo) => {
                let key = format!("{block_id}\u{1f}{span_id}\u{1f}{text}");
                memo.get_or_compute(&key, || engine.context_hash(block_id, text))
            }
            None => engine.context_hash(block_id, text),
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
