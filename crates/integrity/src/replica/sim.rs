// In-memory block document with an annotation store.
//
// Snapshots serialize as JSON:
//
//   { "blocks": [{ "block_id", "kind", "text", "attrs" }],
//     "annotations": { "<anno_id>": { "spans": [...], "chain": {...} } } }
//
// Span offsets are character offsets into the block text. Creating an
// annotation stores its context/chain hashes from the text at that moment;
// later edits shift or stretch span offsets but never rewrite stored hashes,
// so drift shows up in scans.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scriptum_common::canon::{canonicalize, CanonBlock, RawNode};
use scriptum_common::types::{AnnotationScanData, ChainScanData, SpanScanData};

use crate::checkpoint::{EditOperation, SpanAnchor};
use crate::hash::{DocumentChecksum, HashEngine};
use crate::scanner::DocumentStateProvider;

use super::{byte_range, char_to_byte, ApplyError};

pub const ROOT_BLOCK_ID: &str = "root";
pub const ROOT_KIND: &str = "doc";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimBlock {
    pub block_id: String,
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimSpan {
    pub span_id: String,
    pub block_id: String,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_context_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SimAnnotation {
    #[serde(default)]
    pub spans: Vec<SimSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainScanData>,
}

impl SimAnnotation {
    fn to_scan_data(&self, anno_id: &str) -> AnnotationScanData {
        AnnotationScanData {
            anno_id: anno_id.to_string(),
            spans: self
                .spans
                .iter()
                .map(|span| SpanScanData {
                    span_id: span.span_id.clone(),
                    block_id: span.block_id.clone(),
                    stored_context_hash: span.stored_context_hash.clone(),
                })
                .collect(),
            chain: self.chain.clone(),
        }
    }
}

/// Render blocks as a canonical tree under a synthetic `root` block.
pub fn canon_from_blocks(blocks: &[SimBlock]) -> CanonBlock {
    let children = blocks
        .iter()
        .map(|block| {
            let node = RawNode::element(
                block.kind.as_str(),
                Some(block.block_id.as_str()),
                vec![RawNode::text(block.text.as_str())],
            );
            block.attrs.iter().fold(node, |node, (key, value)| node.with_attr(key, value.clone()))
        })
        .collect();
    canonicalize(&RawNode::element(ROOT_KIND, Some(ROOT_BLOCK_ID), children))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimDocument {
    #[serde(default)]
    pub blocks: Vec<SimBlock>,
    #[serde(default)]
    pub annotations: BTreeMap<String, SimAnnotation>,
    /// Engine used to stamp hashes on annotation create.
    #[serde(skip)]
    engine: HashEngine,
}

impl SimDocument {
    pub fn with_engine(engine: HashEngine) -> Self {
        Self { engine, ..Self::default() }
    }

    pub fn set_engine(&mut self, engine: HashEngine) {
        self.engine = engine;
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).context("failed to parse document snapshot")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize document snapshot")
    }

    /// Append a block at the end of the document.
    pub fn push_block(&mut self, block_id: &str, kind: &str, text: &str) {
        self.blocks.push(SimBlock {
            block_id: block_id.to_string(),
            kind: kind.to_string(),
            text: text.to_string(),
            attrs: BTreeMap::new(),
        });
    }

    pub fn block_ids(&self) -> Vec<String> {
        self.blocks.iter().map(|block| block.block_id.clone()).collect()
    }

    pub fn block(&self, block_id: &str) -> Option<&SimBlock> {
        self.blocks.iter().find(|block| block.block_id == block_id)
    }

    fn position(&self, block_id: &str) -> Result<usize, ApplyError> {
        self.blocks
            .iter()
            .position(|block| block.block_id == block_id)
            .ok_or_else(|| ApplyError::UnknownBlock(block_id.to_string()))
    }

    fn insert_position(&self, after: Option<&str>) -> Result<usize, ApplyError> {
        match after {
            Some(after) => Ok(self.position(after)? + 1),
            None => Ok(0),
        }
    }

    fn spans_in_mut<'a>(
        &'a mut self,
        block_id: &'a str,
    ) -> impl Iterator<Item = &'a mut SimSpan> + 'a {
        self.annotations
            .values_mut()
            .flat_map(|anno| anno.spans.iter_mut())
            .filter(move |span| span.block_id == block_id)
    }

    fn char_len(&self, block_id: &str) -> usize {
        self.block(block_id).map_or(0, |block| block.text.chars().count())
    }

    pub fn to_canon(&self) -> CanonBlock {
        canon_from_blocks(&self.blocks)
    }

    pub fn document_checksum(&self) -> DocumentChecksum {
        self.engine.compute_document_checksum_from_canon(&self.to_canon())
    }

    pub fn apply(&mut self, op: &EditOperation) -> Result<(), ApplyError> {
        match op {
            EditOperation::TextEdit { block_id, offset, delete, insert } => {
                let position = self.position(block_id)?;
                let block = &mut self.blocks[position];
                let range = byte_range(&block.text, block_id, *offset, *delete)?;
                block.text.replace_range(range, insert);
                let delta = insert.chars().count() as isize - *delete as isize;
                let edit_end = offset + delete;
                for span in self.spans_in_mut(block_id) {
                    if edit_end <= span.start {
                        span.start = shift(span.start, delta);
                        span.end = shift(span.end, delta);
                    } else if *offset < span.end {
                        span.end = shift(span.end, delta).max(span.start);
                    }
                }
                self.clamp_spans(block_id);
            }
            EditOperation::BlockInsert { block_id, after, kind, text } => {
                if self.block(block_id).is_some() {
                    return Err(ApplyError::DuplicateBlock(block_id.clone()));
                }
                let position = self.insert_position(after.as_deref())?;
                self.blocks.insert(
                    position,
                    SimBlock {
                        block_id: block_id.clone(),
                        kind: kind.clone(),
                        text: text.clone(),
                        attrs: BTreeMap::new(),
                    },
                );
            }
            EditOperation::BlockSplit { block_id, offset, new_block_id } => {
                if self.block(new_block_id).is_some() {
                    return Err(ApplyError::DuplicateBlock(new_block_id.clone()));
                }
                let position = self.position(block_id)?;
                let block = &mut self.blocks[position];
                let len = block.text.chars().count();
                let tail_range =
                    byte_range(&block.text, block_id, *offset, len.saturating_sub(*offset))?;
                let tail = block.text.split_off(tail_range.start);
                let kind = block.kind.clone();
                self.blocks.insert(
                    position + 1,
                    SimBlock {
                        block_id: new_block_id.clone(),
                        kind,
                        text: tail,
                        attrs: BTreeMap::new(),
                    },
                );
                for span in self.spans_in_mut(block_id) {
                    if span.start >= *offset {
                        span.block_id = new_block_id.clone();
                        span.start -= offset;
                        span.end -= offset;
                    } else {
                        span.end = span.end.min(*offset);
                    }
                }
            }
            EditOperation::BlockMerge { block_id, into_block_id } => {
                if block_id == into_block_id {
                    return Err(ApplyError::SelfReference(block_id.clone()));
                }
                let into = self.position(into_block_id)?;
                let source = self.position(block_id)?;
                let base = self.char_len(into_block_id);
                let removed = self.blocks.remove(source);
                let into = if source < into { into - 1 } else { into };
                self.blocks[into].text.push_str(&removed.text);
                for span in self.spans_in_mut(block_id) {
                    span.block_id = into_block_id.clone();
                    span.start += base;
                    span.end += base;
                }
            }
            EditOperation::BlockDelete { block_id } => {
                let position = self.position(block_id)?;
                self.blocks.remove(position);
            }
            EditOperation::BlockMove { block_id, after } => {
                if after.as_deref() == Some(block_id.as_str()) {
                    return Err(ApplyError::SelfReference(block_id.clone()));
                }
                if let Some(after) = after {
                    self.position(after)?;
                }
                let current = self.position(block_id)?;
                let block = self.blocks.remove(current);
                let position = self.insert_position(after.as_deref())?;
                self.blocks.insert(position, block);
            }
            EditOperation::AttrChange { block_id, key, value } => {
                let position = self.position(block_id)?;
                let attrs = &mut self.blocks[position].attrs;
                match value {
                    Some(value) => {
                        attrs.insert(key.clone(), value.clone());
                    }
                    None => {
                        attrs.remove(key);
                    }
                }
            }
            EditOperation::AnnotationCreate { anno_id, spans, chain } => {
                if self.annotations.contains_key(anno_id) {
                    return Err(ApplyError::DuplicateAnnotation(anno_id.clone()));
                }
                let spans = spans
                    .iter()
                    .map(|anchor| self.stamp_span(anchor))
                    .collect::<Result<Vec<_>, _>>()?;
                let chain = chain.as_ref().map(|chain| ChainScanData {
                    stored_chain_hash: Some(self.engine.compute_chain_hash(chain).hash),
                    chain: chain.clone(),
                });
                self.annotations.insert(anno_id.clone(), SimAnnotation { spans, chain });
            }
            EditOperation::AnnotationDelete { anno_id } => {
                self.annotations
                    .remove(anno_id)
                    .ok_or_else(|| ApplyError::UnknownAnnotation(anno_id.clone()))?;
            }
        }
        Ok(())
    }

    fn stamp_span(&self, anchor: &SpanAnchor) -> Result<SimSpan, ApplyError> {
        let block = self
            .block(&anchor.block_id)
            .ok_or_else(|| ApplyError::UnknownBlock(anchor.block_id.clone()))?;
        let text = slice_chars(&block.text, anchor.start, anchor.end).ok_or_else(|| {
            ApplyError::InvalidSpan {
                span_id: anchor.span_id.clone(),
                block_id: anchor.block_id.clone(),
                start: anchor.start,
                end: anchor.end,
            }
        })?;
        Ok(SimSpan {
            span_id: anchor.span_id.clone(),
            block_id: anchor.block_id.clone(),
            start: anchor.start,
            end: anchor.end,
            stored_context_hash: Some(self.engine.context_hash(&anchor.block_id, text)),
        })
    }

    fn clamp_spans(&mut self, block_id: &str) {
        let len = self.char_len(block_id);
        for span in self.spans_in_mut(block_id) {
            span.end = span.end.min(len);
            span.start = span.start.min(span.end);
        }
    }
}

fn shift(value: usize, delta: isize) -> usize {
    value.saturating_add_signed(delta)
}

/// `text[start..end]` in characters, or `None` if the range does not fit.
fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end || end > text.chars().count() {
        return None;
    }
    Some(&text[char_to_byte(text, start)..char_to_byte(text, end)])
}

impl DocumentStateProvider for SimDocument {
    fn annotations(&self) -> Result<Vec<AnnotationScanData>> {
        Ok(self.annotations.iter().map(|(anno_id, anno)| anno.to_scan_data(anno_id)).collect())
    }

    fn span_text(&self, block_id: &str, span_id: &str) -> Result<Option<String>> {
        let Some(block) = self.block(block_id) else {
            return Ok(None);
        };
        let span = self
            .annotations
            .values()
            .flat_map(|anno| anno.spans.iter())
            .find(|span| span.span_id == span_id && span.block_id == block_id);
        Ok(span.and_then(|span| slice_chars(&block.text, span.start, span.end)).map(str::to_string))
    }

    fn block_order(&self) -> Result<Vec<String>> {
        Ok(self.block_ids())
    }
}
