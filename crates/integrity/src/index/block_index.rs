// Structural index over a document's blocks.
//
// Built in one pass over blocks in document pre-order. Positions are the
// pre-order ordinal, depth comes from a parent-stack walk. The index is the
// single source of truth for block <-> annotation associations during scans;
// it never holds block content.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use scriptum_common::canon::CanonBlock;
use scriptum_common::types::AnnotationScanData;

/// One block as fed to `BlockIndex::build`, in document pre-order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockInput {
    pub block_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl BlockInput {
    pub fn top_level(block_id: impl Into<String>) -> Self {
        Self { block_id: block_id.into(), parent_id: None }
    }

    pub fn child(block_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self { block_id: block_id.into(), parent_id: Some(parent_id.into()) }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub block_id: String,
    pub position: usize,
    pub parent_id: Option<String>,
    pub depth: usize,
    pub annotation_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    order: Vec<String>,
    entries: HashMap<String, BlockIndexEntry>,
    blocks_by_annotation: HashMap<String, BTreeSet<String>>,
}

impl BlockIndex {
    /// Rebuild from scratch. `block_annotations` maps block id to the
    /// annotations anchored in it; associations for unknown blocks are dropped.
    pub fn build(blocks: &[BlockInput], block_annotations: &HashMap<String, Vec<String>>) -> Self {
        let mut index = Self {
            order: Vec::with_capacity(blocks.len()),
            entries: HashMap::with_capacity(blocks.len()),
            blocks_by_annotation: HashMap::new(),
        };
        let mut stack: Vec<&str> = Vec::new();

        for block in blocks {
            if index.entries.contains_key(&block.block_id) {
                debug!(block_id = %block.block_id, "duplicate block id ignored by index");
                continue;
            }

            match block.parent_id.as_deref() {
                Some(parent) if stack.contains(&parent) => {
                    while stack.last().is_some_and(|top| *top != parent) {
                        stack.pop();
                    }
                }
                _ => stack.clear(),
            }

            let depth = stack.len();
            let position = index.order.len();
            index.order.push(block.block_id.clone());
            index.entries.insert(
                block.block_id.clone(),
                BlockIndexEntry {
                    block_id: block.block_id.clone(),
                    position,
                    parent_id: block.parent_id.clone(),
                    depth,
                    annotation_ids: BTreeSet::new(),
                },
            );
            stack.push(&block.block_id);
        }

        for (block_id, anno_ids) in block_annotations {
            for anno_id in anno_ids {
                index.add_annotation(block_id, anno_id);
            }
        }
        index
    }

    /// Flatten a canonical tree. The root itself is not indexed; its
    /// children are top-level blocks.
    pub fn build_from_canon(
        root: &CanonBlock,
        block_annotations: &HashMap<String, Vec<String>>,
    ) -> Self {
        let mut blocks = Vec::new();
        root.walk(&mut |block, depth, parent| {
            if depth == 0 {
                return;
            }
            blocks.push(BlockInput {
                block_id: block.block_id.clone(),
                parent_id: if depth == 1 { None } else { parent.map(str::to_string) },
            });
        });
        Self::build(&blocks, block_annotations)
    }

    // ── Structural queries ─────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn block_ids(&self) -> &[String] {
        &self.order
    }

    pub fn entry(&self, block_id: &str) -> Option<&BlockIndexEntry> {
        self.entries.get(block_id)
    }

    pub fn position_of(&self, block_id: &str) -> Option<usize> {
        self.entries.get(block_id).map(|entry| entry.position)
    }

    pub fn get_block_at_position(&self, position: usize) -> Option<&str> {
        self.order.get(position).map(String::as_str)
    }

    /// Blocks in positions `start..end`, clamped to the document.
    pub fn get_blocks_in_range(&self, start: usize, end: usize) -> &[String] {
        let end = end.min(self.order.len());
        let start = start.min(end);
        &self.order[start..end]
    }

    // ── Annotation associations ────────────────────────────────────

    pub fn get_annotations_for_block(&self, block_id: &str) -> Vec<&str> {
        self.entries
            .get(block_id)
            .map(|entry| entry.annotation_ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Blocks an annotation touches, in document order.
    pub fn get_blocks_for_annotation(&self, anno_id: &str) -> Vec<&str> {
        let Some(blocks) = self.blocks_by_annotation.get(anno_id) else {
            return Vec::new();
        };
        let mut ordered: Vec<(usize, &str)> = blocks
            .iter()
            .filter_map(|block_id| self.position_of(block_id).map(|pos| (pos, block_id.as_str())))
            .collect();
        ordered.sort_unstable();
        ordered.into_iter().map(|(_, block_id)| block_id).collect()
    }

    pub fn annotation_count(&self) -> usize {
        self.blocks_by_annotation.len()
    }

    /// Annotations whose first and last indexed blocks enclose `position`.
    pub fn annotations_spanning(&self, position: usize) -> Vec<String> {
        let mut spanning: Vec<String> = self
            .blocks_by_annotation
            .iter()
            .filter(|(_, blocks)| {
                let positions = blocks.iter().filter_map(|block_id| self.position_of(block_id));
                let (lo, hi) = positions
                    .fold((usize::MAX, 0), |(lo, hi), pos| (lo.min(pos), hi.max(pos)));
                lo <= position && position <= hi
            })
            .map(|(anno_id, _)| anno_id.clone())
            .collect();
        spanning.sort_unstable();
        spanning
    }

    /// Annotations anchored in more than one block.
    pub fn multi_block_annotations(&self) -> Vec<String> {
        let mut multi: Vec<String> = self
            .blocks_by_annotation
            .iter()
            .filter(|(_, blocks)| blocks.len() > 1)
            .map(|(anno_id, _)| anno_id.clone())
            .collect();
        multi.sort_unstable();
        multi
    }

    /// Associate an annotation with a block. Returns `false` if the block is
    /// not indexed.
    pub fn add_annotation(&mut self, block_id: &str, anno_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(block_id) else {
            return false;
        };
        entry.annotation_ids.insert(anno_id.to_string());
        self.blocks_by_annotation
            .entry(anno_id.to_string())
            .or_default()
            .insert(block_id.to_string());
        true
    }

    /// Drop one association. The annotation's reverse entry disappears once
    /// it no longer touches any block.
    pub fn remove_annotation(&mut self, block_id: &str, anno_id: &str) -> bool {
        let removed = self
            .entries
            .get_mut(block_id)
            .is_some_and(|entry| entry.annotation_ids.remove(anno_id));
        if let Some(blocks) = self.blocks_by_annotation.get_mut(anno_id) {
            blocks.remove(block_id);
            if blocks.is_empty() {
                self.blocks_by_annotation.remove(anno_id);
            }
        }
        removed
    }

    /// Drop every association of an annotation. Returns the blocks it touched.
    pub fn remove_annotation_everywhere(&mut self, anno_id: &str) -> Vec<String> {
        let blocks = self.blocks_by_annotation.remove(anno_id).unwrap_or_default();
        for block_id in &blocks {
            if let Some(entry) = self.entries.get_mut(block_id) {
                entry.annotation_ids.remove(anno_id);
            }
        }
        blocks.into_iter().collect()
    }
}

/// Invert annotation scan data into the `block -> annotations` map `build` takes.
pub fn block_annotation_map(annotations: &[AnnotationScanData]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for anno in annotations {
        for block_id in anno.block_ids() {
            let annos = map.entry(block_id.to_string()).or_default();
            if !annos.contains(&anno.anno_id) {
                annos.push(anno.anno_id.clone());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptum_common::canon::{canonicalize, RawNode};

    fn flat(ids: &[&str]) -> Vec<BlockInput> {
        ids.iter().map(|id| BlockInput::top_level(*id)).collect()
    }

    fn annos(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(block, ids)| (block.to_string(), ids.iter().map(|id| id.to_string()).collect()))
            .collect()
    }

    // ── build ──────────────────────────────────────────────────────

    #[test]
    fn build_assigns_positions_and_depths() {
        let blocks = vec![
            BlockInput::top_level("h1"),
            BlockInput::child("p1", "h1"),
            BlockInput::child("l1", "h1"),
            BlockInput::child("li1", "l1"),
            BlockInput::child("p2", "h1"),
            BlockInput::top_level("h2"),
        ];
        let index = BlockIndex::build(&blocks, &HashMap::new());

        assert_eq!(index.len(), 6);
        let depths: Vec<usize> =
            index.block_ids().iter().map(|id| index.entry(id).unwrap().depth).collect();
        assert_eq!(depths, vec![0, 1, 1, 2, 1, 0]);
        assert_eq!(index.position_of("li1"), Some(3));
        assert_eq!(index.entry("p2").unwrap().parent_id.as_deref(), Some("h1"));
    }

    #[test]
    fn unknown_parent_resets_to_top_level() {
        let blocks = vec![BlockInput::top_level("a"), BlockInput::child("b", "ghost")];
        let index = BlockIndex::build(&blocks, &HashMap::new());
        assert_eq!(index.entry("b").unwrap().depth, 0);
    }

    #[test]
    fn duplicate_ids_keep_first_position() {
        let index = BlockIndex::build(&flat(&["a", "b", "a"]), &HashMap::new());
        assert_eq!(index.len(), 2);
        assert_eq!(index.position_of("a"), Some(0));
    }

    #[test]
    fn build_from_canon_skips_root() {
        let root = canonicalize(&RawNode::element(
            "doc",
            Some("root"),
            vec![
                RawNode::element("paragraph", Some("p1"), vec![]),
                RawNode::element(
                    "list",
                    Some("l1"),
                    vec![RawNode::element("item", Some("i1"), vec![])],
                ),
            ],
        ));
        let index = BlockIndex::build_from_canon(&root, &annos(&[("i1", &["a1"])]));
        assert_eq!(index.block_ids(), &["p1", "l1", "i1"]);
        assert_eq!(index.entry("i1").unwrap().depth, 1);
        assert_eq!(index.get_annotations_for_block("i1"), vec!["a1"]);
    }

    // ── position queries ───────────────────────────────────────────

    #[test]
    fn range_queries_are_clamped() {
        let index = BlockIndex::build(&flat(&["a", "b", "c", "d"]), &HashMap::new());
        assert_eq!(index.get_blocks_in_range(1, 3), &["b", "c"]);
        assert_eq!(index.get_blocks_in_range(2, 99), &["c", "d"]);
        assert!(index.get_blocks_in_range(5, 9).is_empty());
        assert!(index.get_blocks_in_range(3, 1).is_empty());
        assert_eq!(index.get_block_at_position(0), Some("a"));
        assert_eq!(index.get_block_at_position(4), None);
    }

    // ── annotations ────────────────────────────────────────────────

    #[test]
    fn bidirectional_lookup() {
        let index = BlockIndex::build(
            &flat(&["b1", "b2", "b3"]),
            &annos(&[("b3", &["a1"]), ("b1", &["a1", "a2"])]),
        );
        assert_eq!(index.get_annotations_for_block("b1"), vec!["a1", "a2"]);
        assert_eq!(index.get_blocks_for_annotation("a1"), vec!["b1", "b3"]);
        assert_eq!(index.annotation_count(), 2);
    }

    #[test]
    fn add_to_unknown_block_is_rejected() {
        let mut index = BlockIndex::build(&flat(&["b1"]), &HashMap::new());
        assert!(!index.add_annotation("nope", "a1"));
        assert!(index.get_blocks_for_annotation("a1").is_empty());
    }

    #[test]
    fn removing_last_reference_clears_entry() {
        let mut index =
            BlockIndex::build(&flat(&["b1", "b2"]), &annos(&[("b1", &["a1"]), ("b2", &["a1"])]));
        assert!(index.remove_annotation("b1", "a1"));
        assert_eq!(index.get_blocks_for_annotation("a1"), vec!["b2"]);
        assert!(index.remove_annotation("b2", "a1"));
        assert_eq!(index.annotation_count(), 0);
        assert!(!index.remove_annotation("b2", "a1"));
    }

    #[test]
    fn spanning_uses_first_and_last_position() {
        let index = BlockIndex::build(
            &flat(&["b1", "b2", "b3", "b4"]),
            &annos(&[("b1", &["wide"]), ("b3", &["wide", "single"]), ("b4", &["tail"])]),
        );
        assert_eq!(index.annotations_spanning(1), vec!["wide"]);
        assert_eq!(index.annotations_spanning(2), vec!["single", "wide"]);
        assert_eq!(index.annotations_spanning(3), vec!["tail"]);
        assert_eq!(index.multi_block_annotations(), vec!["wide"]);
    }

    #[test]
    fn remove_everywhere_returns_touched_blocks() {
        let mut index = BlockIndex::build(
            &flat(&["b1", "b2"]),
            &annos(&[("b1", &["a1"]), ("b2", &["a1", "a2"])]),
        );
        let mut touched = index.remove_annotation_everywhere("a1");
        touched.sort();
        assert_eq!(touched, vec!["b1", "b2"]);
        assert!(index.get_annotations_for_block("b1").is_empty());
        assert_eq!(index.get_annotations_for_block("b2"), vec!["a2"]);
    }

    #[test]
    fn annotation_map_dedupes_per_block() {
        use scriptum_common::types::SpanScanData;
        let anno = AnnotationScanData {
            anno_id: "a1".into(),
            spans: vec![
                SpanScanData {
                    span_id: "s1".into(),
                    block_id: "b1".into(),
                    stored_context_hash: None,
                },
                SpanScanData {
                    span_id: "s2".into(),
                    block_id: "b1".into(),
                    stored_context_hash: None,
                },
            ],
            chain: None,
        };
        let map = block_annotation_map(&[anno]);
        assert_eq!(map["b1"], vec!["a1"]);
    }
}
