// Block documents that edit operations apply to.
//
// `ReplicaDoc` is the yrs-backed form used to check that replicas converge
// (SEC). `SimDocument` is a plain in-memory document with an annotation
// store, used by the corpus generator and as a scan provider.
//
// yrs layout of a replica:
//   order          Y.Array of block ids, document order
//   kinds          Y.Map block id -> block type
//   block:<id>     Y.Text, the block's inline text
//   attrs:<id>     Y.Map attribute -> stable JSON string

use std::collections::BTreeMap;
use std::ops::Range;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Array, ArrayRef, Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, Transact, Update,
};

use scriptum_common::canon::CanonBlock;
use scriptum_common::json::stable::stable_stringify;

use crate::checkpoint::EditOperation;
use crate::hash::{DocumentChecksum, HashEngine};

pub mod sim;

pub use sim::{canon_from_blocks, SimAnnotation, SimBlock, SimDocument, SimSpan};

const ORDER_KEY: &str = "order";
const KINDS_KEY: &str = "kinds";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("unknown block `{0}`")]
    UnknownBlock(String),
    #[error("block `{0}` already exists")]
    DuplicateBlock(String),
    #[error("range {offset}+{delete} is out of bounds for block `{block_id}` ({len} chars)")]
    OffsetOutOfRange { block_id: String, offset: usize, delete: usize, len: usize },
    #[error("block `{0}` cannot be positioned relative to itself")]
    SelfReference(String),
    #[error("unknown annotation `{0}`")]
    UnknownAnnotation(String),
    #[error("annotation `{0}` already exists")]
    DuplicateAnnotation(String),
    #[error("span `{span_id}` ({start}..{end}) does not fit block `{block_id}`")]
    InvalidSpan { span_id: String, block_id: String, start: usize, end: usize },
}

/// Byte offset of the `chars`-th character, or the end of `text`.
pub(crate) fn char_to_byte(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(index, _)| index)
}

/// Byte range for a character-offset edit, checked against the text length.
pub(crate) fn byte_range(
    text: &str,
    block_id: &str,
    offset: usize,
    delete: usize,
) -> Result<Range<usize>, ApplyError> {
    let len = text.chars().count();
    let end = offset.checked_add(delete).filter(|end| *end <= len).ok_or_else(|| {
        ApplyError::OffsetOutOfRange { block_id: block_id.to_string(), offset, delete, len }
    })?;
    Ok(char_to_byte(text, offset)..char_to_byte(text, end))
}

fn text_key(block_id: &str) -> String {
    format!("block:{block_id}")
}

fn attrs_key(block_id: &str) -> String {
    format!("attrs:{block_id}")
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// yrs-backed block document.
pub struct ReplicaDoc {
    doc: Doc,
    order: ArrayRef,
    kinds: MapRef,
}

impl ReplicaDoc {
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Deterministic client id, for reproducible convergence tests.
    pub fn with_client_id(client_id: u64) -> Self {
        let options = yrs::Options { client_id, ..Default::default() };
        Self::from_doc(Doc::with_options(options))
    }

    fn from_doc(doc: Doc) -> Self {
        let order = doc.get_or_insert_array(ORDER_KEY);
        let kinds = doc.get_or_insert_map(KINDS_KEY);
        Self { doc, order, kinds }
    }

    pub fn from_state(data: &[u8]) -> Result<Self> {
        let replica = Self::new();
        replica.apply_update(data).context("failed to load replica state")?;
        Ok(replica)
    }

    // ── Sync ───────────────────────────────────────────────────────

    pub fn apply_update(&self, data: &[u8]) -> Result<()> {
        let update = Update::decode_v1(data).context("failed to decode replica update")?;
        self.doc.transact_mut().apply_update(update).context("failed to apply replica update")?;
        Ok(())
    }

    pub fn encode_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).context("failed to decode state vector")?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    /// Pull everything `source` has that this replica has not seen.
    pub fn sync_from(&self, source: &ReplicaDoc) -> Result<()> {
        let diff = source.encode_diff(&self.encode_state_vector())?;
        self.apply_update(&diff)
    }

    // ── Reads ──────────────────────────────────────────────────────

    fn raw_order(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.order.iter(&txn).map(|id| id.to_string(&txn)).collect()
    }

    /// Block ids in document order. Concurrent moves can leave an id in the
    /// order array twice; the first occurrence wins.
    pub fn block_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.raw_order().into_iter().filter(|id| seen.insert(id.clone())).collect()
    }

    pub fn contains_block(&self, block_id: &str) -> bool {
        self.raw_order().iter().any(|id| id == block_id)
    }

    pub fn block_text(&self, block_id: &str) -> Option<String> {
        if !self.contains_block(block_id) {
            return None;
        }
        Some(self.read_text(block_id))
    }

    fn read_text(&self, block_id: &str) -> String {
        let text = self.doc.get_or_insert_text(text_key(block_id));
        text.get_string(&self.doc.transact())
    }

    fn read_kind(&self, block_id: &str) -> String {
        let txn = self.doc.transact();
        self.kinds
            .get(&txn, block_id)
            .map_or_else(|| "paragraph".to_string(), |kind| kind.to_string(&txn))
    }

    fn read_attrs(&self, block_id: &str) -> BTreeMap<String, Value> {
        let attrs = self.doc.get_or_insert_map(attrs_key(block_id));
        let txn = self.doc.transact();
        attrs
            .iter(&txn)
            .map(|(key, value)| {
                let raw = value.to_string(&txn);
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                (key.to_string(), value)
            })
            .collect()
    }

    /// Current blocks, in document order.
    pub fn blocks(&self) -> Vec<SimBlock> {
        self.block_ids()
            .into_iter()
            .map(|block_id| SimBlock {
                text: self.read_text(&block_id),
                kind: self.read_kind(&block_id),
                attrs: self.read_attrs(&block_id),
                block_id,
            })
            .collect()
    }

    pub fn to_canon(&self) -> CanonBlock {
        canon_from_blocks(&self.blocks())
    }

    /// Tier 2 checksum of the replica's current content.
    pub fn document_checksum(&self, engine: &HashEngine) -> DocumentChecksum {
        engine.compute_document_checksum_from_canon(&self.to_canon())
    }

    // ── Edits ──────────────────────────────────────────────────────

    /// Apply one edit locally. Annotation operations carry no block content
    /// and are accepted as no-ops.
    pub fn apply(&self, op: &EditOperation) -> Result<(), ApplyError> {
        match op {
            EditOperation::TextEdit { block_id, offset, delete, insert } => {
                self.require_block(block_id)?;
                let current = self.read_text(block_id);
                let range = byte_range(&current, block_id, *offset, *delete)?;
                let text = self.doc.get_or_insert_text(text_key(block_id));
                let mut txn = self.doc.transact_mut();
                if !range.is_empty() {
                    text.remove_range(&mut txn, to_u32(range.start), to_u32(range.len()));
                }
                if !insert.is_empty() {
                    text.insert(&mut txn, to_u32(range.start), insert);
                }
            }
            EditOperation::BlockInsert { block_id, after, kind, text: content } => {
                if self.contains_block(block_id) {
                    return Err(ApplyError::DuplicateBlock(block_id.clone()));
                }
                let index = self.insert_index(after.as_deref())?;
                let text = self.doc.get_or_insert_text(text_key(block_id));
                let mut txn = self.doc.transact_mut();
                // A re-used id may still hold text from before its deletion.
                let stale = text.len(&txn);
                if stale > 0 {
                    text.remove_range(&mut txn, 0, stale);
                }
                if !content.is_empty() {
                    text.insert(&mut txn, 0, content);
                }
                self.kinds.insert(&mut txn, block_id.as_str(), kind.as_str());
                self.order.insert(&mut txn, index, block_id.as_str());
            }
            EditOperation::BlockSplit { block_id, offset, new_block_id } => {
                self.require_block(block_id)?;
                if self.contains_block(new_block_id) {
                    return Err(ApplyError::DuplicateBlock(new_block_id.clone()));
                }
                let current = self.read_text(block_id);
                let len = current.chars().count();
                let tail_range =
                    byte_range(&current, block_id, *offset, len.saturating_sub(*offset))?;
                let tail = current[tail_range.clone()].to_string();
                let kind = self.read_kind(block_id);
                let index = self.insert_index(Some(block_id))?;

                let head_text = self.doc.get_or_insert_text(text_key(block_id));
                let tail_text = self.doc.get_or_insert_text(text_key(new_block_id));
                let mut txn = self.doc.transact_mut();
                if !tail_range.is_empty() {
                    head_text.remove_range(
                        &mut txn,
                        to_u32(tail_range.start),
                        to_u32(tail_range.len()),
                    );
                }
                let stale = tail_text.len(&txn);
                if stale > 0 {
                    tail_text.remove_range(&mut txn, 0, stale);
                }
                if !tail.is_empty() {
                    tail_text.insert(&mut txn, 0, &tail);
                }
                self.kinds.insert(&mut txn, new_block_id.as_str(), kind.as_str());
                self.order.insert(&mut txn, index, new_block_id.as_str());
            }
            EditOperation::BlockMerge { block_id, into_block_id } => {
                if block_id == into_block_id {
                    return Err(ApplyError::SelfReference(block_id.clone()));
                }
                self.require_block(block_id)?;
                self.require_block(into_block_id)?;
                let moved = self.read_text(block_id);
                let target = self.doc.get_or_insert_text(text_key(into_block_id));
                let source = self.doc.get_or_insert_text(text_key(block_id));
                let mut txn = self.doc.transact_mut();
                if !moved.is_empty() {
                    let end = target.len(&txn);
                    target.insert(&mut txn, end, &moved);
                }
                let len = source.len(&txn);
                if len > 0 {
                    source.remove_range(&mut txn, 0, len);
                }
                drop(txn);
                self.remove_from_order(block_id);
            }
            EditOperation::BlockDelete { block_id } => {
                self.require_block(block_id)?;
                let text = self.doc.get_or_insert_text(text_key(block_id));
                {
                    let mut txn = self.doc.transact_mut();
                    let len = text.len(&txn);
                    if len > 0 {
                        text.remove_range(&mut txn, 0, len);
                    }
                }
                self.remove_from_order(block_id);
            }
            EditOperation::BlockMove { block_id, after } => {
                if after.as_deref() == Some(block_id.as_str()) {
                    return Err(ApplyError::SelfReference(block_id.clone()));
                }
                self.require_block(block_id)?;
                if let Some(after) = after {
                    self.require_block(after)?;
                }
                self.remove_from_order(block_id);
                let index = self.insert_index(after.as_deref())?;
                let mut txn = self.doc.transact_mut();
                self.order.insert(&mut txn, index, block_id.as_str());
            }
            EditOperation::AttrChange { block_id, key, value } => {
                self.require_block(block_id)?;
                let attrs = self.doc.get_or_insert_map(attrs_key(block_id));
                let mut txn = self.doc.transact_mut();
                match value {
                    Some(value) => {
                        let encoded = stable_stringify(value);
                        attrs.insert(&mut txn, key.as_str(), encoded.as_str());
                    }
                    None => {
                        attrs.remove(&mut txn, key);
                    }
                }
            }
            EditOperation::AnnotationCreate { .. } | EditOperation::AnnotationDelete { .. } => {}
        }
        Ok(())
    }

    fn require_block(&self, block_id: &str) -> Result<(), ApplyError> {
        if self.contains_block(block_id) {
            Ok(())
        } else {
            Err(ApplyError::UnknownBlock(block_id.to_string()))
        }
    }

    /// Raw order-array index for inserting after `after` (start when `None`).
    fn insert_index(&self, after: Option<&str>) -> Result<u32, ApplyError> {
        let Some(after) = after else {
            return Ok(0);
        };
        let position = self
            .raw_order()
            .iter()
            .position(|id| id == after)
            .ok_or_else(|| ApplyError::UnknownBlock(after.to_string()))?;
        Ok(to_u32(position + 1))
    }

    fn remove_from_order(&self, block_id: &str) {
        let positions: Vec<usize> = self
            .raw_order()
            .iter()
            .enumerate()
            .filter(|(_, id)| id.as_str() == block_id)
            .map(|(position, _)| position)
            .collect();
        let mut txn = self.doc.transact_mut();
        for position in positions.into_iter().rev() {
            self.order.remove_range(&mut txn, to_u32(position), 1);
        }
    }
}

impl Default for ReplicaDoc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(block_id: &str, after: Option<&str>, text: &str) -> EditOperation {
        EditOperation::BlockInsert {
            block_id: block_id.into(),
            after: after.map(str::to_string),
            kind: "paragraph".into(),
            text: text.into(),
        }
    }

    fn seeded(client_id: u64) -> ReplicaDoc {
        let replica = ReplicaDoc::with_client_id(client_id);
        replica.apply(&insert("b1", None, "hello")).unwrap();
        replica.apply(&insert("b2", Some("b1"), "world")).unwrap();
        replica
    }

    // ── Local edits ───────────────────────────────────────────────

    #[test]
    fn text_edit_uses_character_offsets() {
        let replica = ReplicaDoc::new();
        replica.apply(&insert("b1", None, "héllo")).unwrap();
        replica
            .apply(&EditOperation::TextEdit {
                block_id: "b1".into(),
                offset: 2,
                delete: 2,
                insert: "LL".into(),
            })
            .unwrap();
        assert_eq!(replica.block_text("b1").as_deref(), Some("héLLo"));
    }

    #[test]
    fn out_of_range_edit_is_rejected() {
        let replica = seeded(1);
        let err = replica
            .apply(&EditOperation::TextEdit {
                block_id: "b1".into(),
                offset: 4,
                delete: 3,
                insert: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ApplyError::OffsetOutOfRange { len: 5, .. }));
    }

    #[test]
    fn split_merge_and_move_reshape_order() {
        let replica = seeded(1);
        replica
            .apply(&EditOperation::BlockSplit {
                block_id: "b1".into(),
                offset: 2,
                new_block_id: "b3".into(),
            })
            .unwrap();
        assert_eq!(replica.block_ids(), vec!["b1", "b3", "b2"]);
        assert_eq!(replica.block_text("b1").as_deref(), Some("he"));
        assert_eq!(replica.block_text("b3").as_deref(), Some("llo"));

        replica.apply(&EditOperation::BlockMove { block_id: "b2".into(), after: None }).unwrap();
        assert_eq!(replica.block_ids(), vec!["b2", "b1", "b3"]);

        replica
            .apply(&EditOperation::BlockMerge { block_id: "b3".into(), into_block_id: "b1".into() })
            .unwrap();
        assert_eq!(replica.block_ids(), vec!["b2", "b1"]);
        assert_eq!(replica.block_text("b1").as_deref(), Some("hello"));
        assert_eq!(replica.block_text("b3"), None);
    }

    #[test]
    fn attrs_round_trip_through_yrs_map() {
        let replica = seeded(1);
        replica
            .apply(&EditOperation::AttrChange {
                block_id: "b1".into(),
                key: "level".into(),
                value: Some(json!(2)),
            })
            .unwrap();
        assert_eq!(replica.blocks()[0].attrs.get("level"), Some(&json!(2)));

        replica.apply(&EditOperation::AttrChange {
            block_id: "b1".into(),
            key: "level".into(),
            value: None,
        })
        .unwrap();
        assert!(replica.blocks()[0].attrs.is_empty());
    }

    #[test]
    fn unknown_blocks_and_self_moves_are_rejected() {
        let replica = seeded(1);
        assert_eq!(
            replica.apply(&EditOperation::BlockDelete { block_id: "nope".into() }),
            Err(ApplyError::UnknownBlock("nope".into()))
        );
        assert_eq!(
            replica.apply(&EditOperation::BlockMove {
                block_id: "b1".into(),
                after: Some("b1".into()),
            }),
            Err(ApplyError::SelfReference("b1".into()))
        );
        assert_eq!(
            replica.apply(&insert("b1", None, "x")),
            Err(ApplyError::DuplicateBlock("b1".into()))
        );
    }

    // ── Sync ──────────────────────────────────────────────────────

    #[test]
    fn concurrent_edits_converge_to_same_checksum() {
        let engine = HashEngine::default();
        let a = seeded(1);
        let b = ReplicaDoc::with_client_id(2);
        b.sync_from(&a).unwrap();

        a.apply(&EditOperation::TextEdit {
            block_id: "b1".into(),
            offset: 5,
            delete: 0,
            insert: "!".into(),
        })
        .unwrap();
        b.apply(&insert("b3", Some("b1"), "middle")).unwrap();

        a.sync_from(&b).unwrap();
        b.sync_from(&a).unwrap();

        assert_eq!(a.document_checksum(&engine), b.document_checksum(&engine));
        assert_eq!(a.block_ids(), vec!["b1", "b3", "b2"]);
    }

    #[test]
    fn concurrent_moves_keep_one_copy_of_each_block() {
        let a = seeded(1);
        let b = ReplicaDoc::with_client_id(2);
        b.sync_from(&a).unwrap();

        a.apply(&EditOperation::BlockMove {
            block_id: "b1".into(),
            after: Some("b2".into()),
        })
        .unwrap();
        b.apply(&EditOperation::BlockMove {
            block_id: "b1".into(),
            after: Some("b2".into()),
        })
        .unwrap();
        a.sync_from(&b).unwrap();
        b.sync_from(&a).unwrap();

        assert_eq!(a.block_ids(), b.block_ids());
        assert_eq!(a.block_ids().len(), 2);
    }

    #[test]
    fn state_snapshot_restores_content() {
        let engine = HashEngine::default();
        let replica = seeded(1);
        let restored = ReplicaDoc::from_state(&replica.encode_state()).unwrap();
        assert_eq!(restored.document_checksum(&engine), replica.document_checksum(&engine));
    }

    #[test]
    fn invalid_update_returns_error() {
        assert!(ReplicaDoc::new().apply_update(b"not an update").is_err());
    }
}
