// Canonicalization: RawNode tree → CanonBlock tree.
//
// Never fails. Malformed input degrades to the best tree we can build, and
// nesting deeper than MAX_CANON_DEPTH is cut off (the outcome records it).

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::raw::{RawMark, RawNode};
use super::{CanonBlock, CanonNode, CanonText, LINK_MARK};
use crate::text::normalize::normalize_anchor_text;

/// Maximum block nesting depth kept in a canonical tree.
pub const MAX_CANON_DEPTH: usize = 128;

/// JSON container nesting kept when parsing bytes. Each block level costs two
/// containers (the object and its children array), the rest is attr headroom.
const MAX_JSON_DEPTH: usize = 3 * MAX_CANON_DEPTH;

/// Block id given to a root without one.
const ROOT_BLOCK_ID: &str = "root";
/// Block type given to a synthesized root.
const ROOT_BLOCK_KIND: &str = "doc";
/// Attribute keys that carry a block id rather than block content.
const ID_ATTR_KEYS: [&str; 3] = ["id", "block_id", "blockId"];

/// A canonical tree plus what had to be dropped to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonOutcome {
    pub root: CanonBlock,
    /// True when subtrees beyond `MAX_CANON_DEPTH` were discarded.
    pub truncated: bool,
    /// Number of blocks in the resulting tree.
    pub block_count: usize,
}

/// Canonicalize a node tree.
pub fn canonicalize(root: &RawNode) -> CanonBlock {
    canonicalize_with_outcome(root).root
}

/// Canonicalize a node tree and report truncation.
pub fn canonicalize_with_outcome(root: &RawNode) -> CanonOutcome {
    let mut state = CanonState::default();
    let root = match root {
        RawNode::Element { kind, id, attrs, children } => {
            state.block(kind, id.as_deref(), attrs, children, ROOT_BLOCK_ID, 0)
        }
        text @ RawNode::Text { .. } => {
            let mut block = CanonBlock::new(ROOT_BLOCK_ID, ROOT_BLOCK_KIND);
            state.blocks += 1;
            push_text(&mut block.children, text);
            block
        }
    };

    CanonOutcome { root, truncated: state.truncated, block_count: state.blocks }
}

/// Canonicalize arbitrary JSON. Never fails.
pub fn canonicalize_value(value: &Value) -> CanonOutcome {
    canonicalize_with_outcome(&RawNode::from_value(value))
}

/// Canonicalize arbitrary bytes. Never fails.
///
/// Valid JSON goes through `canonicalize_value`; anything else becomes a
/// single paragraph holding the lossy UTF-8 text. Nesting is capped before
/// parsing, so deep documents truncate the same way whatever their layout.
pub fn canonicalize_bytes(data: &[u8]) -> CanonOutcome {
    let (pruned, pruned_any) = prune_json_depth(data, MAX_JSON_DEPTH);
    match parse_json(&pruned) {
        Ok(value) => {
            let mut outcome = canonicalize_value(&value);
            outcome.truncated |= pruned_any;
            outcome
        }
        Err(_) => {
            let text = String::from_utf8_lossy(data).into_owned();
            let paragraph = RawNode::element("paragraph", None, vec![RawNode::text(text)]);
            canonicalize_with_outcome(&RawNode::element(ROOT_BLOCK_KIND, None, vec![paragraph]))
        }
    }
}

/// Parse without serde_json's recursion limit. Callers bound the depth.
fn parse_json(data: &[u8]) -> serde_json::Result<Value> {
    let mut deserializer = serde_json::Deserializer::from_slice(data);
    deserializer.disable_recursion_limit();
    let value = Value::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

/// Replace every container nested deeper than `max_depth` with `null`.
///
/// Brackets inside strings do not count. Returns the input untouched (and
/// `false`) when nothing was that deep.
fn prune_json_depth(data: &[u8], max_depth: usize) -> (Cow<'_, [u8]>, bool) {
    let mut out: Option<Vec<u8>> = None;
    let mut depth = 0usize;
    let mut skipping_at: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (index, &byte) in data.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else {
            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => {
                    depth += 1;
                    if depth > max_depth && skipping_at.is_none() {
                        let buf = out.get_or_insert_with(|| data[..index].to_vec());
                        buf.extend_from_slice(b"null");
                        skipping_at = Some(depth);
                        continue;
                    }
                }
                b'}' | b']' => {
                    let closed = depth;
                    depth = depth.saturating_sub(1);
                    if skipping_at == Some(closed) {
                        skipping_at = None;
                        continue;
                    }
                }
                _ => {}
            }
        }

        if skipping_at.is_none() {
            if let Some(buf) = out.as_mut() {
                buf.push(byte);
            }
        }
    }

    match out {
        Some(buf) => (Cow::Owned(buf), true),
        None => (Cow::Borrowed(data), false),
    }
}

#[derive(Default)]
struct CanonState {
    truncated: bool,
    blocks: usize,
}

impl CanonState {
    fn block(
        &mut self,
        kind: &str,
        id: Option<&str>,
        attrs: &Map<String, Value>,
        children: &[RawNode],
        fallback_id: &str,
        depth: usize,
    ) -> CanonBlock {
        self.blocks += 1;
        let block_id = resolve_block_id(id, attrs).unwrap_or_else(|| fallback_id.to_string());
        let kind = normalize_kind(kind);
        let attrs = normalize_attrs(attrs);

        let mut out = Vec::with_capacity(children.len());
        let mut ordinal = 0usize;
        for child in children {
            match child {
                RawNode::Element { kind, id, attrs, children } => {
                    let child_fallback = format!("{block_id}.{ordinal}");
                    ordinal += 1;
                    if depth + 1 > MAX_CANON_DEPTH {
                        self.truncated = true;
                        continue;
                    }
                    let block = self.block(
                        kind,
                        id.as_deref(),
                        attrs,
                        children,
                        &child_fallback,
                        depth + 1,
                    );
                    out.push(CanonNode::Block(block));
                }
                text @ RawNode::Text { .. } => push_text(&mut out, text),
            }
        }

        CanonBlock { block_id, kind, attrs, children: out }
    }
}

fn resolve_block_id(id: Option<&str>, attrs: &Map<String, Value>) -> Option<String> {
    let explicit = id.map(str::trim).filter(|id| !id.is_empty());
    if let Some(id) = explicit {
        return Some(id.to_string());
    }

    ID_ATTR_KEYS
        .iter()
        .filter_map(|key| attrs.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn normalize_kind(kind: &str) -> String {
    let trimmed = kind.trim();
    if trimmed.is_empty() {
        "block".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_attrs(attrs: &Map<String, Value>) -> BTreeMap<String, Value> {
    attrs
        .iter()
        .filter(|(key, _)| !ID_ATTR_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| strip_nulls(value).map(|value| (key.clone(), value)))
        .collect()
}

/// Drop `null` object members recursively. A top-level `null` yields `None`.
fn strip_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(key, value)| strip_nulls(value).map(|value| (key.clone(), value)))
                .collect(),
        )),
        Value::Array(items) => Some(Value::Array(
            items.iter().map(|item| strip_nulls(item).unwrap_or(Value::Null)).collect(),
        )),
        other => Some(other.clone()),
    }
}

fn push_text(out: &mut Vec<CanonNode>, node: &RawNode) {
    let RawNode::Text { text, marks, attrs } = node else {
        return;
    };

    let text = normalize_anchor_text(text);
    if text.is_empty() {
        return;
    }

    let (marks, href) = normalize_marks(marks, attrs);
    let run = CanonText { text, marks, href };

    if let Some(CanonNode::Text(previous)) = out.last_mut() {
        if previous.has_same_format(&run) {
            previous.text.push_str(&run.text);
            return;
        }
    }
    out.push(CanonNode::Text(run));
}

fn normalize_marks(marks: &[RawMark], attrs: &Map<String, Value>) -> (Vec<String>, Option<String>) {
    let mut names: Vec<String> = marks
        .iter()
        .map(|mark| mark.kind.trim().to_string())
        .filter(|kind| !kind.is_empty())
        .collect();
    names.sort();
    names.dedup();

    if !names.iter().any(|name| name == LINK_MARK) {
        return (names, None);
    }

    let href = marks
        .iter()
        .filter(|mark| mark.kind.trim() == LINK_MARK)
        .find_map(|mark| mark.attrs.get("href").and_then(Value::as_str))
        .or_else(|| attrs.get("href").and_then(Value::as_str))
        .map(str::to_string);

    (names, href)
}
