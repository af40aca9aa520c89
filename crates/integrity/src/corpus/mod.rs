// Seed corpus for conformance testing.
//
// `generate_seed_corpus` walks a fixed base document through a
// deterministic sequence of edits, one category at a time, and records each
// operation together with the Tier 2 checksum of the document before and
// after it. The corpus is a plain JSON array; `replay_corpus` re-applies it
// from the base document and fails on the first checksum drift.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use scriptum_common::types::{ChainData, ChainPolicyKind};

use crate::checkpoint::{EditOperation, SpanAnchor};
use crate::replica::{ApplyError, SimDocument};

pub mod fuzz;
pub mod rng;

pub use rng::Lcg;

pub const DEFAULT_CORPUS_SEED: u64 = 0x5c21_97a0;
pub const DEFAULT_PER_CATEGORY: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusConfig {
    pub seed: u64,
    /// Entries generated for each category.
    pub per_category: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self { seed: DEFAULT_CORPUS_SEED, per_category: DEFAULT_PER_CATEGORY }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CorpusCategory {
    TextEdit,
    UnicodeEdit,
    BlockInsert,
    BlockSplit,
    BlockMerge,
    BlockDelete,
    BlockMove,
    AttrChange,
    AnnotationCreate,
    AnnotationDelete,
}

impl CorpusCategory {
    /// Generation order within a round. Inserts and splits come before
    /// merges and deletes so the document never shrinks to nothing, and an
    /// annotation always exists by the time one is deleted.
    pub const ALL: [CorpusCategory; 10] = [
        Self::TextEdit,
        Self::UnicodeEdit,
        Self::BlockInsert,
        Self::BlockSplit,
        Self::BlockMerge,
        Self::BlockDelete,
        Self::BlockMove,
        Self::AttrChange,
        Self::AnnotationCreate,
        Self::AnnotationDelete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextEdit => "text_edit",
            Self::UnicodeEdit => "unicode_edit",
            Self::BlockInsert => "block_insert",
            Self::BlockSplit => "block_split",
            Self::BlockMerge => "block_merge",
            Self::BlockDelete => "block_delete",
            Self::BlockMove => "block_move",
            Self::AttrChange => "attr_change",
            Self::AnnotationCreate => "annotation_create",
            Self::AnnotationDelete => "annotation_delete",
        }
    }
}

impl fmt::Display for CorpusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusEntry {
    pub index: usize,
    pub category: CorpusCategory,
    pub op: EditOperation,
    /// Tier 2 document checksum before `op` was applied.
    pub pre_op_checksum: String,
    pub post_op_checksum: String,
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus entry {index} failed to apply: {source}")]
    Apply {
        index: usize,
        #[source]
        source: ApplyError,
    },
    #[error("corpus entry {index}: {stage} checksum drifted (expected {expected}, got {actual})")]
    ChecksumDrift { index: usize, stage: &'static str, expected: String, actual: String },
    #[error("failed to serialize corpus: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse corpus: {0}")]
    Deserialize(#[source] serde_json::Error),
}

// ── Base document ──────────────────────────────────────────────────

const ASCII_WORDS: [&str; 10] =
    ["lorem", "ipsum", "dolor", "anchor", "chain", "block", "span", "merge", "sit", "amet"];

/// Inserts that stress normalization: combining marks, CRLF, astral
/// characters, compatibility forms, zero-width joiners.
const UNICODE_SAMPLES: [&str; 10] =
    ["é", "e\u{301}", "\u{212b}", "日本語", "🙂", "👩\u{200d}💻", "\r\n", "ﬁ", "ñ", "\u{301}"];

const BLOCK_KINDS: [&str; 4] = ["paragraph", "heading", "list_item", "quote"];
const ATTR_KEYS: [&str; 4] = ["level", "align", "checked", "indent"];

/// The document every corpus starts from.
pub fn base_document() -> SimDocument {
    let mut doc = SimDocument::default();
    doc.push_block("h1", "heading", "Integrity corpus");
    doc.push_block("p1", "paragraph", "The quick brown fox jumps over the lazy dog.");
    doc.push_block("p2", "paragraph", "Café déjà vu, naïve coöperation.");
    doc.push_block("p3", "paragraph", "日本語のテキスト と emoji 🙂");
    doc.push_block("l1", "list_item", "first item");
    doc.push_block("l2", "list_item", "second item");

    let seed_annotation = EditOperation::AnnotationCreate {
        anno_id: "seed".into(),
        spans: vec![
            SpanAnchor { span_id: "seed.s0".into(), block_id: "p1".into(), start: 4, end: 9 },
            SpanAnchor { span_id: "seed.s1".into(), block_id: "p2".into(), start: 0, end: 4 },
        ],
        chain: Some(ChainData {
            policy_kind: ChainPolicyKind::StrictAdjacency,
            max_intervening_blocks: 0,
            block_ids: vec!["p1".into(), "p2".into()],
        }),
    };
    // Anchors are hand-checked against the texts above.
    if let Err(error) = doc.apply(&seed_annotation) {
        debug!(%error, "seed annotation skipped");
    }
    doc
}

// ── Generation ─────────────────────────────────────────────────────

/// Deterministic for a given config: same seed, same corpus.
pub fn generate_seed_corpus(config: &CorpusConfig) -> Result<Vec<CorpusEntry>, CorpusError> {
    let mut rng = Lcg::new(config.seed);
    let mut doc = base_document();
    let mut entries = Vec::with_capacity(config.per_category * CorpusCategory::ALL.len());

    for _ in 0..config.per_category {
        for category in CorpusCategory::ALL {
            let index = entries.len();
            let Some(op) = generate_op(category, &doc, &mut rng, index) else {
                debug!(%category, index, "no applicable operation; category skipped this round");
                continue;
            };
            let pre_op_checksum = doc.document_checksum().checksum;
            doc.apply(&op).map_err(|source| CorpusError::Apply { index, source })?;
            let post_op_checksum = doc.document_checksum().checksum;
            entries.push(CorpusEntry { index, category, op, pre_op_checksum, post_op_checksum });
        }
    }

    info!(seed = config.seed, entries = entries.len(), "seed corpus generated");
    Ok(entries)
}

fn generate_op(
    category: CorpusCategory,
    doc: &SimDocument,
    rng: &mut Lcg,
    index: usize,
) -> Option<EditOperation> {
    let blocks = &doc.blocks;
    let fresh_id = format!("n{index}");

    match category {
        CorpusCategory::TextEdit | CorpusCategory::UnicodeEdit => {
            let block = rng.pick(blocks)?;
            let len = block.text.chars().count();
            let offset = rng.next_usize(len + 1);
            let delete = rng.next_usize((len - offset).min(4) + 1);
            let insert = if category == CorpusCategory::UnicodeEdit {
                UNICODE_SAMPLES[rng.next_usize(UNICODE_SAMPLES.len())].to_string()
            } else {
                ascii_text(rng, 1, 3)
            };
            Some(EditOperation::TextEdit {
                block_id: block.block_id.clone(),
                offset,
                delete,
                insert,
            })
        }
        CorpusCategory::BlockInsert => {
            let after = if blocks.is_empty() || rng.next_usize(4) == 0 {
                None
            } else {
                rng.pick(blocks).map(|block| block.block_id.clone())
            };
            Some(EditOperation::BlockInsert {
                block_id: fresh_id,
                after,
                kind: BLOCK_KINDS[rng.next_usize(BLOCK_KINDS.len())].to_string(),
                text: ascii_text(rng, 0, 6),
            })
        }
        CorpusCategory::BlockSplit => {
            let block = rng.pick(blocks)?;
            let offset = rng.next_usize(block.text.chars().count() + 1);
            Some(EditOperation::BlockSplit {
                block_id: block.block_id.clone(),
                offset,
                new_block_id: fresh_id,
            })
        }
        CorpusCategory::BlockMerge => {
            if blocks.len() < 2 {
                return None;
            }
            let position = 1 + rng.next_usize(blocks.len() - 1);
            Some(EditOperation::BlockMerge {
                block_id: blocks[position].block_id.clone(),
                into_block_id: blocks[position - 1].block_id.clone(),
            })
        }
        CorpusCategory::BlockDelete => {
            if blocks.len() < 2 {
                return None;
            }
            let block = rng.pick(blocks)?;
            Some(EditOperation::BlockDelete { block_id: block.block_id.clone() })
        }
        CorpusCategory::BlockMove => {
            if blocks.len() < 2 {
                return None;
            }
            let block_id = rng.pick(blocks)?.block_id.clone();
            let others: Vec<&str> = blocks
                .iter()
                .map(|block| block.block_id.as_str())
                .filter(|id| *id != block_id)
                .collect();
            let choice = rng.next_usize(others.len() + 1);
            let after = others.get(choice).map(|id| id.to_string());
            Some(EditOperation::BlockMove { block_id, after })
        }
        CorpusCategory::AttrChange => {
            let block = rng.pick(blocks)?;
            let key = ATTR_KEYS[rng.next_usize(ATTR_KEYS.len())].to_string();
            let value = match rng.next_usize(4) {
                0 => None,
                1 => Some(json!(rng.next_usize(6) + 1)),
                2 => {
                    let align = ["left", "center", "right"][rng.next_usize(3)];
                    Some(json!(align))
                }
                _ => Some(json!(rng.next_bool())),
            };
            Some(EditOperation::AttrChange { block_id: block.block_id.clone(), key, value })
        }
        CorpusCategory::AnnotationCreate => {
            let position = rng.next_usize(blocks.len());
            let first = blocks.get(position)?;
            let anno_id = format!("a{index}");
            let mut spans = vec![random_anchor(rng, &anno_id, 0, &first.block_id, &first.text)];
            let mut chain = None;

            if let Some(next) = blocks.get(position + 1).filter(|_| rng.next_bool()) {
                spans.push(random_anchor(rng, &anno_id, 1, &next.block_id, &next.text));
                let policy_kind = [
                    ChainPolicyKind::StrictAdjacency,
                    ChainPolicyKind::RequiredOrder,
                    ChainPolicyKind::BoundedGap,
                ][rng.next_usize(3)];
                chain = Some(ChainData {
                    policy_kind,
                    max_intervening_blocks: if policy_kind == ChainPolicyKind::BoundedGap {
                        2
                    } else {
                        0
                    },
                    block_ids: vec![first.block_id.clone(), next.block_id.clone()],
                });
            }
            Some(EditOperation::AnnotationCreate { anno_id, spans, chain })
        }
        CorpusCategory::AnnotationDelete => {
            let ids: Vec<&String> = doc.annotations.keys().collect();
            let anno_id = (*rng.pick(&ids)?).clone();
            Some(EditOperation::AnnotationDelete { anno_id })
        }
    }
}

fn random_anchor(
    rng: &mut Lcg,
    anno_id: &str,
    ordinal: usize,
    block_id: &str,
    text: &str,
) -> SpanAnchor {
    let len = text.chars().count();
    let start = rng.next_usize(len + 1);
    let end = start + rng.next_usize(len - start + 1);
    SpanAnchor {
        span_id: format!("{anno_id}.s{ordinal}"),
        block_id: block_id.to_string(),
        start,
        end,
    }
}

fn ascii_text(rng: &mut Lcg, min_words: usize, max_words: usize) -> String {
    let count = min_words + rng.next_usize(max_words.saturating_sub(min_words) + 1);
    (0..count).map(|_| ASCII_WORDS[rng.next_usize(ASCII_WORDS.len())]).collect::<Vec<_>>().join(" ")
}

// ── Persistence and replay ─────────────────────────────────────────

pub fn serialize_corpus(entries: &[CorpusEntry]) -> Result<String, CorpusError> {
    serde_json::to_string_pretty(entries).map_err(CorpusError::Serialize)
}

pub fn deserialize_corpus(data: &str) -> Result<Vec<CorpusEntry>, CorpusError> {
    serde_json::from_str(data).map_err(CorpusError::Deserialize)
}

/// Re-apply a corpus to the base document, checking every recorded
/// checksum. Returns the final document.
pub fn replay_corpus(entries: &[CorpusEntry]) -> Result<SimDocument, CorpusError> {
    let mut doc = base_document();
    for entry in entries {
        check_checksum(entry.index, "pre-op", &entry.pre_op_checksum, &doc)?;
        doc.apply(&entry.op).map_err(|source| CorpusError::Apply { index: entry.index, source })?;
        check_checksum(entry.index, "post-op", &entry.post_op_checksum, &doc)?;
    }
    Ok(doc)
}

fn check_checksum(
    index: usize,
    stage: &'static str,
    expected: &str,
    doc: &SimDocument,
) -> Result<(), CorpusError> {
    let actual = doc.document_checksum().checksum;
    if actual == expected {
        Ok(())
    } else {
        Err(CorpusError::ChecksumDrift { index, stage, expected: expected.to_string(), actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn small() -> CorpusConfig {
        CorpusConfig { seed: 11, per_category: 3 }
    }

    #[test]
    fn base_document_carries_seed_annotation() {
        let doc = base_document();
        assert_eq!(doc.blocks.len(), 6);
        assert!(doc.annotations.contains_key("seed"));
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let first = generate_seed_corpus(&small()).unwrap();
        let second = generate_seed_corpus(&small()).unwrap();
        assert_eq!(first, second);

        let other = generate_seed_corpus(&CorpusConfig { seed: 12, ..small() }).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn every_category_is_represented() {
        let entries = generate_seed_corpus(&small()).unwrap();
        let categories: BTreeSet<CorpusCategory> =
            entries.iter().map(|entry| entry.category).collect();
        assert_eq!(categories.len(), CorpusCategory::ALL.len());
        assert_eq!(entries.len(), 3 * CorpusCategory::ALL.len());
    }

    #[test]
    fn entries_chain_checksums() {
        let entries = generate_seed_corpus(&small()).unwrap();
        for pair in entries.windows(2) {
            assert_eq!(pair[0].post_op_checksum, pair[1].pre_op_checksum);
        }
        for entry in entries.iter().filter(|entry| entry.op.annotation_id().is_some()) {
            assert_eq!(
                entry.pre_op_checksum, entry.post_op_checksum,
                "annotations are not document content"
            );
        }
    }

    #[test]
    fn replay_accepts_generated_corpus() {
        let entries = generate_seed_corpus(&small()).unwrap();
        let doc = replay_corpus(&entries).unwrap();
        assert_eq!(
            doc.document_checksum().checksum,
            entries.last().map(|entry| entry.post_op_checksum.clone()).unwrap()
        );
    }

    #[test]
    fn replay_detects_tampered_checksum() {
        let mut entries = generate_seed_corpus(&small()).unwrap();
        entries[4].pre_op_checksum = "0".repeat(64);
        match replay_corpus(&entries) {
            Err(CorpusError::ChecksumDrift { index: 4, stage: "pre-op", .. }) => {}
            other => panic!("expected drift at entry 4, got {other:?}"),
        }
    }

    #[test]
    fn malformed_corpus_is_a_parse_error() {
        assert!(matches!(
            deserialize_corpus("{\"not\": \"an array\"}"),
            Err(CorpusError::Deserialize(_))
        ));
    }

    #[test]
    fn category_names_match_serde() {
        for category in CorpusCategory::ALL {
            assert_eq!(serde_json::to_value(category).unwrap(), json!(category.as_str()));
        }
    }
}
