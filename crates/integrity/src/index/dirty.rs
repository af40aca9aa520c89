// Dirty region tracking between checkpoints.
//
// Marking a block dirty cascades to every annotation registered against it,
// including annotations registered while the block is already dirty. Extra
// dirty annotations are harmless; missing ones are a coverage bug the
// scanner's compare pass will flag.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block_index::BlockIndex;

/// Snapshot of everything touched since the last checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirtyRegion {
    pub block_ids: BTreeSet<String>,
    pub annotation_ids: BTreeSet<String>,
    pub first_modified_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl DirtyRegion {
    pub fn is_empty(&self) -> bool {
        self.block_ids.is_empty() && self.annotation_ids.is_empty()
    }

    /// Dirty blocks in sorted order, ready for `dirty_scan`.
    pub fn touched_blocks(&self) -> Vec<String> {
        self.block_ids.iter().cloned().collect()
    }

    /// Build a region from explicit block ids (no annotation cascade).
    pub fn from_blocks<I, S>(block_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { block_ids: block_ids.into_iter().map(Into::into).collect(), ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirtyTrackerStats {
    pub dirty_blocks: usize,
    pub dirty_annotations: usize,
    pub registered_blocks: usize,
    pub total_block_marks: u64,
    pub total_annotation_marks: u64,
    pub clears: u64,
}

#[derive(Debug, Default)]
pub struct DirtyRegionTracker {
    annotations_by_block: HashMap<String, BTreeSet<String>>,
    region: DirtyRegion,
    total_block_marks: u64,
    total_annotation_marks: u64,
    clears: u64,
}

impl DirtyRegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all associations with the ones currently in `index`.
    pub fn seed_from_index(&mut self, index: &BlockIndex) {
        self.annotations_by_block.clear();
        for block_id in index.block_ids() {
            for anno_id in index.get_annotations_for_block(block_id) {
                self.register_block_annotation(block_id, anno_id);
            }
        }
    }

    // ── Associations ───────────────────────────────────────────────

    pub fn register_block_annotation(&mut self, block_id: &str, anno_id: &str) {
        self.annotations_by_block
            .entry(block_id.to_string())
            .or_default()
            .insert(anno_id.to_string());
        if self.region.block_ids.contains(block_id) {
            self.region.annotation_ids.insert(anno_id.to_string());
        }
    }

    pub fn unregister_block_annotation(&mut self, block_id: &str, anno_id: &str) {
        if let Some(annos) = self.annotations_by_block.get_mut(block_id) {
            annos.remove(anno_id);
            if annos.is_empty() {
                self.annotations_by_block.remove(block_id);
            }
        }
    }

    // ── Marking ────────────────────────────────────────────────────

    pub fn mark_block_dirty(&mut self, block_id: &str) {
        self.mark_block_dirty_at(block_id, Utc::now());
    }

    pub fn mark_block_dirty_at(&mut self, block_id: &str, now: DateTime<Utc>) {
        self.total_block_marks += 1;
        self.region.block_ids.insert(block_id.to_string());
        if let Some(annos) = self.annotations_by_block.get(block_id) {
            self.region.annotation_ids.extend(annos.iter().cloned());
        }
        self.touch(now);
    }

    pub fn mark_blocks_dirty<'a, I>(&mut self, block_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let now = Utc::now();
        for block_id in block_ids {
            self.mark_block_dirty_at(block_id, now);
        }
    }

    /// Mark an annotation dirty without touching any block (create/delete).
    pub fn mark_annotation_dirty(&mut self, anno_id: &str) {
        self.mark_annotation_dirty_at(anno_id, Utc::now());
    }

    pub fn mark_annotation_dirty_at(&mut self, anno_id: &str, now: DateTime<Utc>) {
        self.total_annotation_marks += 1;
        self.region.annotation_ids.insert(anno_id.to_string());
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if self.region.first_modified_at.is_none() {
            self.region.first_modified_at = Some(now);
        }
        self.region.last_modified_at = Some(now);
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn is_block_dirty(&self, block_id: &str) -> bool {
        self.region.block_ids.contains(block_id)
    }

    pub fn is_annotation_dirty(&self, anno_id: &str) -> bool {
        self.region.annotation_ids.contains(anno_id)
    }

    pub fn is_clean(&self) -> bool {
        self.region.is_empty()
    }

    pub fn touched_blocks(&self) -> Vec<String> {
        self.region.touched_blocks()
    }

    pub fn get_dirty_region(&self) -> DirtyRegion {
        self.region.clone()
    }

    /// Reset the region after a successful checkpoint. Associations stay.
    pub fn clear(&mut self) {
        self.region = DirtyRegion::default();
        self.clears += 1;
    }

    pub fn stats(&self) -> DirtyTrackerStats {
        DirtyTrackerStats {
            dirty_blocks: self.region.block_ids.len(),
            dirty_annotations: self.region.annotation_ids.len(),
            registered_blocks: self.annotations_by_block.len(),
            total_block_marks: self.total_block_marks,
            total_annotation_marks: self.total_annotation_marks,
            clears: self.clears,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn marking_block_cascades_to_annotations() {
        let mut tracker = DirtyRegionTracker::new();
        tracker.register_block_annotation("b1", "a1");
        tracker.register_block_annotation("b1", "a2");
        tracker.register_block_annotation("b2", "a3");

        tracker.mark_block_dirty("b1");
        let region = tracker.get_dirty_region();
        assert_eq!(region.touched_blocks(), vec!["b1"]);
        assert!(region.annotation_ids.contains("a1"));
        assert!(region.annotation_ids.contains("a2"));
        assert!(!region.annotation_ids.contains("a3"));
    }

    #[test]
    fn late_registration_on_dirty_block_is_cascaded() {
        let mut tracker = DirtyRegionTracker::new();
        tracker.mark_block_dirty("b1");
        tracker.register_block_annotation("b1", "a9");
        assert!(tracker.is_annotation_dirty("a9"));
    }

    #[test]
    fn timestamps_track_first_and_last_mark() {
        let mut tracker = DirtyRegionTracker::new();
        tracker.mark_block_dirty_at("b1", ts(0));
        tracker.mark_annotation_dirty_at("a1", ts(5));
        tracker.mark_block_dirty_at("b2", ts(9));

        let region = tracker.get_dirty_region();
        assert_eq!(region.first_modified_at, Some(ts(0)));
        assert_eq!(region.last_modified_at, Some(ts(9)));
    }

    #[test]
    fn clear_resets_region_but_keeps_associations() {
        let mut tracker = DirtyRegionTracker::new();
        tracker.register_block_annotation("b1", "a1");
        tracker.mark_block_dirty("b1");
        tracker.clear();

        assert!(tracker.is_clean());
        assert_eq!(tracker.get_dirty_region(), DirtyRegion::default());

        tracker.mark_block_dirty("b1");
        assert!(tracker.is_annotation_dirty("a1"));
        assert_eq!(tracker.stats().clears, 1);
    }

    #[test]
    fn unregister_stops_future_cascades() {
        let mut tracker = DirtyRegionTracker::new();
        tracker.register_block_annotation("b1", "a1");
        tracker.unregister_block_annotation("b1", "a1");
        tracker.mark_block_dirty("b1");
        assert!(!tracker.is_annotation_dirty("a1"));
        assert_eq!(tracker.stats().registered_blocks, 0);
    }

    #[test]
    fn seed_from_index_copies_associations() {
        use super::super::block_index::BlockInput;
        let blocks = vec![BlockInput::top_level("b1"), BlockInput::top_level("b2")];
        let mut map = HashMap::new();
        map.insert("b2".to_string(), vec!["a1".to_string()]);
        let index = BlockIndex::build(&blocks, &map);

        let mut tracker = DirtyRegionTracker::new();
        tracker.seed_from_index(&index);
        tracker.mark_blocks_dirty(["b1", "b2"]);

        let stats = tracker.stats();
        assert_eq!(stats.dirty_blocks, 2);
        assert_eq!(stats.dirty_annotations, 1);
        assert_eq!(stats.total_block_marks, 2);
        assert!(tracker.is_block_dirty("b2"));
    }
}
