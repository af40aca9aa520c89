// Edit operations as seen by the integrity layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use scriptum_common::types::ChainData;

/// Where an annotation span sits inside a block, in character offsets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanAnchor {
    pub span_id: String,
    pub block_id: String,
    pub start: usize,
    pub end: usize,
}

/// One edit applied to a replica. Offsets are in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    TextEdit {
        block_id: String,
        offset: usize,
        delete: usize,
        #[serde(default)]
        insert: String,
    },
    BlockInsert {
        block_id: String,
        /// Insert after this block; `None` inserts at the start.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
        kind: String,
        #[serde(default)]
        text: String,
    },
    BlockSplit {
        block_id: String,
        offset: usize,
        new_block_id: String,
    },
    /// Append `block_id`'s text to `into_block_id` and remove `block_id`.
    BlockMerge {
        block_id: String,
        into_block_id: String,
    },
    BlockDelete {
        block_id: String,
    },
    BlockMove {
        block_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
    },
    /// Set an attribute; `None` removes it.
    AttrChange {
        block_id: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    AnnotationCreate {
        anno_id: String,
        spans: Vec<SpanAnchor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain: Option<ChainData>,
    },
    AnnotationDelete {
        anno_id: String,
    },
}

impl EditOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextEdit { .. } => "text_edit",
            Self::BlockInsert { .. } => "block_insert",
            Self::BlockSplit { .. } => "block_split",
            Self::BlockMerge { .. } => "block_merge",
            Self::BlockDelete { .. } => "block_delete",
            Self::BlockMove { .. } => "block_move",
            Self::AttrChange { .. } => "attr_change",
            Self::AnnotationCreate { .. } => "annotation_create",
            Self::AnnotationDelete { .. } => "annotation_delete",
        }
    }

    /// Operations that change block structure count toward the full-scan
    /// threshold.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::BlockInsert { .. }
                | Self::BlockSplit { .. }
                | Self::BlockMerge { .. }
                | Self::BlockDelete { .. }
                | Self::BlockMove { .. }
        )
    }

    /// Blocks whose content or neighbourhood this operation changes.
    /// Insert and move also touch the block they land after, so chains
    /// spanning that position are re-verified.
    pub fn touched_blocks(&self) -> Vec<&str> {
        match self {
            Self::TextEdit { block_id, .. }
            | Self::BlockDelete { block_id }
            | Self::AttrChange { block_id, .. } => vec![block_id.as_str()],
            Self::BlockInsert { block_id, after, .. } | Self::BlockMove { block_id, after } => {
                let mut blocks = vec![block_id.as_str()];
                blocks.extend(after.as_deref());
                blocks
            }
            Self::BlockSplit { block_id, new_block_id, .. } => {
                vec![block_id.as_str(), new_block_id.as_str()]
            }
            Self::BlockMerge { block_id, into_block_id } => {
                vec![block_id.as_str(), into_block_id.as_str()]
            }
            Self::AnnotationCreate { spans, chain, .. } => {
                let mut blocks: Vec<&str> =
                    spans.iter().map(|span| span.block_id.as_str()).collect();
                if let Some(chain) = chain {
                    blocks.extend(chain.block_ids.iter().map(String::as_str));
                }
                blocks.sort_unstable();
                blocks.dedup();
                blocks
            }
            Self::AnnotationDelete { .. } => Vec::new(),
        }
    }

    /// Blocks at whose current position this operation changes block
    /// adjacency. Chains spanning any of these positions may gain or lose
    /// intervening blocks without touching a block of their own.
    pub fn neighbourhood_blocks(&self) -> Vec<&str> {
        match self {
            Self::BlockInsert { after, .. } => after.as_deref().into_iter().collect(),
            Self::BlockMove { block_id, after } => {
                let mut blocks = vec![block_id.as_str()];
                blocks.extend(after.as_deref());
                blocks
            }
            Self::BlockSplit { block_id, .. }
            | Self::BlockMerge { block_id, .. }
            | Self::BlockDelete { block_id } => vec![block_id.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn annotation_id(&self) -> Option<&str> {
        match self {
            Self::AnnotationCreate { anno_id, .. } | Self::AnnotationDelete { anno_id } => {
                Some(anno_id.as_str())
            }
            _ => None,
        }
    }
}
