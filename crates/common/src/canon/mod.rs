// Canonical document form used as hashing input.
//
// A `CanonBlock` tree is a pure function of document content: attribute keys
// are sorted, nulls stripped, text is LF + NFC normalized, mark lists are
// sorted and deduplicated, and adjacent text runs with identical formatting
// are merged. Two trees with the same content serialize byte-identically via
// `to_canonical_json`, no matter how the source tree was split or ordered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::json::stable::stable_stringify;

pub mod canonicalize;
pub mod raw;

pub use canonicalize::{
    canonicalize, canonicalize_bytes, canonicalize_value, canonicalize_with_outcome, CanonOutcome,
    MAX_CANON_DEPTH,
};
pub use raw::{RawMark, RawNode};

/// Mark name that allows an `href` to survive canonicalization.
pub const LINK_MARK: &str = "link";

/// A normalized inline text run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl CanonText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), marks: Vec::new(), href: None }
    }

    pub fn has_same_format(&self, other: &CanonText) -> bool {
        self.marks == other.marks && self.href == other.href
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("text".into(), Value::String(self.text.clone()));
        map.insert(
            "marks".into(),
            Value::Array(self.marks.iter().cloned().map(Value::String).collect()),
        );
        if let Some(href) = &self.href {
            map.insert("href".into(), Value::String(href.clone()));
        }
        Value::Object(map)
    }
}

/// A child of a canonical block: either a nested block or an inline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum CanonNode {
    Block(CanonBlock),
    Text(CanonText),
}

/// A normalized block node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonBlock {
    pub block_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default)]
    pub children: Vec<CanonNode>,
}

impl CanonBlock {
    pub fn new(block_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            kind: kind.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Inline text runs that are direct children of this block, in order.
    pub fn inline_segments(&self) -> impl Iterator<Item = &CanonText> {
        self.children.iter().filter_map(|child| match child {
            CanonNode::Text(text) => Some(text),
            CanonNode::Block(_) => None,
        })
    }

    /// Nested blocks that are direct children of this block, in order.
    pub fn child_blocks(&self) -> impl Iterator<Item = &CanonBlock> {
        self.children.iter().filter_map(|child| match child {
            CanonNode::Block(block) => Some(block),
            CanonNode::Text(_) => None,
        })
    }

    /// Concatenated text of this block's own inline runs.
    pub fn inline_text(&self) -> String {
        self.inline_segments().map(|segment| segment.text.as_str()).collect()
    }

    /// Visit this block and every descendant block in document (pre-)order,
    /// passing the block depth (root = 0) and the parent id.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a CanonBlock, usize, Option<&'a str>),
    {
        // Explicit stack keeps pathological depth off the call stack.
        let mut stack: Vec<(&CanonBlock, usize, Option<&str>)> = vec![(self, 0, None)];
        while let Some((block, depth, parent)) = stack.pop() {
            visit(block, depth, parent);
            let children: Vec<&CanonBlock> = block.child_blocks().collect();
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1, Some(block.block_id.as_str())));
            }
        }
    }

    /// Number of blocks in this subtree, including `self`.
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _, _| count += 1);
        count
    }

    /// Find a block by id anywhere in the subtree.
    pub fn find(&self, block_id: &str) -> Option<&CanonBlock> {
        let mut found = None;
        self.walk(&mut |block, _, _| {
            if found.is_none() && block.block_id == block_id {
                found = Some(block);
            }
        });
        found
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("block_id".into(), Value::String(self.block_id.clone()));
        map.insert("type".into(), Value::String(self.kind.clone()));
        map.insert(
            "attrs".into(),
            Value::Object(self.attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
        let children = self
            .children
            .iter()
            .map(|child| match child {
                CanonNode::Block(block) => block.to_value(),
                CanonNode::Text(text) => text.to_value(),
            })
            .collect();
        map.insert("children".into(), Value::Array(children));
        Value::Object(map)
    }
}

/// Byte-stable serialization of a canonical tree.
pub fn to_canonical_json(block: &CanonBlock) -> String {
    stable_stringify(&block.to_value())
}
