// Rough heap-size estimates for cached values.

use std::mem::size_of;

use serde_json::Value;

use scriptum_common::canon::{CanonBlock, CanonNode, CanonText};

/// Approximate bytes a value holds. Used only for cache budgeting.
pub trait EstimateSize {
    fn estimate_size(&self) -> usize;
}

impl EstimateSize for String {
    fn estimate_size(&self) -> usize {
        size_of::<String>() + self.len()
    }
}

impl EstimateSize for Vec<u8> {
    fn estimate_size(&self) -> usize {
        size_of::<Vec<u8>>() + self.len()
    }
}

impl EstimateSize for Value {
    fn estimate_size(&self) -> usize {
        size_of::<Value>()
            + match self {
                Value::Null | Value::Bool(_) | Value::Number(_) => 0,
                Value::String(s) => s.len(),
                Value::Array(items) => items.iter().map(EstimateSize::estimate_size).sum(),
                Value::Object(map) => {
                    map.iter().map(|(key, value)| key.len() + value.estimate_size()).sum()
                }
            }
    }
}

impl EstimateSize for CanonText {
    fn estimate_size(&self) -> usize {
        size_of::<CanonText>()
            + self.text.len()
            + self.marks.iter().map(String::len).sum::<usize>()
            + self.href.as_ref().map_or(0, String::len)
    }
}

impl EstimateSize for CanonBlock {
    fn estimate_size(&self) -> usize {
        let attrs: usize =
            self.attrs.iter().map(|(key, value)| key.len() + value.estimate_size()).sum();
        let children: usize = self
            .children
            .iter()
            .map(|child| match child {
                CanonNode::Block(block) => block.estimate_size(),
                CanonNode::Text(text) => text.estimate_size(),
            })
            .sum();
        size_of::<CanonBlock>() + self.block_id.len() + self.kind.len() + attrs + children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_estimate_grows_with_length() {
        let short = "ab".to_string().estimate_size();
        let long = "abcdef".to_string().estimate_size();
        assert_eq!(long - short, 4);
    }

    #[test]
    fn nested_values_count_children() {
        let flat = json!({ "a": 1 }).estimate_size();
        let nested = json!({ "a": 1, "b": [1, 2, "xyz"] }).estimate_size();
        assert!(nested > flat);
    }

    #[test]
    fn canon_block_counts_subtree() {
        let mut root = CanonBlock::new("root", "doc");
        let empty = root.estimate_size();
        let mut child = CanonBlock::new("p1", "paragraph");
        child.children.push(CanonNode::Text(CanonText::plain("hello world")));
        root.children.push(CanonNode::Block(child));
        assert!(root.estimate_size() > empty + "hello world".len());
    }
}
