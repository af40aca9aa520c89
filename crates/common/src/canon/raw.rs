// Loose input tree accepted by the canonicalizer.
//
// Editors hand us whatever their in-memory tree looks like. `RawNode` is the
// typed form; `RawNode::from_value` interprets arbitrary JSON into it without
// ever failing: unknown shapes degrade to text or generic blocks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::canonicalize::MAX_CANON_DEPTH;

/// A formatting mark on an inline text run (`bold`, `link`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawMark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl RawMark {
    pub fn named(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attrs: Map::new() }
    }

    pub fn link(href: impl Into<String>) -> Self {
        let mut attrs = Map::new();
        attrs.insert("href".into(), Value::String(href.into()));
        Self { kind: super::LINK_MARK.into(), attrs }
    }
}

/// An unnormalized document node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum RawNode {
    Text {
        text: String,
        #[serde(default)]
        marks: Vec<RawMark>,
        #[serde(default)]
        attrs: Map<String, Value>,
    },
    Element {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attrs: Map<String, Value>,
        #[serde(default)]
        children: Vec<RawNode>,
    },
}

impl RawNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), marks: Vec::new(), attrs: Map::new() }
    }

    pub fn marked_text(text: impl Into<String>, marks: Vec<RawMark>) -> Self {
        Self::Text { text: text.into(), marks, attrs: Map::new() }
    }

    pub fn element(kind: impl Into<String>, id: Option<&str>, children: Vec<RawNode>) -> Self {
        Self::Element {
            kind: kind.into(),
            id: id.map(str::to_string),
            attrs: Map::new(),
            children,
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        match &mut self {
            Self::Text { attrs, .. } | Self::Element { attrs, .. } => {
                attrs.insert(key.to_string(), value);
            }
        }
        self
    }

    /// Interpret arbitrary JSON as a node tree. Never fails.
    ///
    /// - strings, numbers, booleans become text runs; `null` becomes empty text
    /// - arrays become a `fragment` element
    /// - objects with a string `text` and no `children`/`content` become text runs
    /// - other objects become elements (`type`/`kind`, `id`/`block_id`,
    ///   `attrs`, `children`/`content`)
    pub fn from_value(value: &Value) -> Self {
        from_value_at_depth(value, 0)
    }
}

fn from_value_at_depth(value: &Value, depth: usize) -> RawNode {
    // One level past the cap survives so the canonicalizer sees (and reports)
    // what it drops.
    if depth > MAX_CANON_DEPTH + 1 {
        return RawNode::text("");
    }

    match value {
        Value::Null => RawNode::text(""),
        Value::Bool(flag) => RawNode::text(flag.to_string()),
        Value::Number(number) => RawNode::text(number.to_string()),
        Value::String(text) => RawNode::text(text.clone()),
        Value::Array(items) => RawNode::Element {
            kind: "fragment".into(),
            id: None,
            attrs: Map::new(),
            children: items.iter().map(|item| from_value_at_depth(item, depth + 1)).collect(),
        },
        Value::Object(map) => object_to_node(map, depth),
    }
}

fn object_to_node(map: &Map<String, Value>, depth: usize) -> RawNode {
    let children_value = map.get("children").or_else(|| map.get("content"));
    let attrs = map.get("attrs").and_then(Value::as_object).cloned().unwrap_or_default();

    if let (Some(Value::String(text)), None) = (map.get("text"), children_value) {
        let mut attrs = attrs;
        if let Some(href) = map.get("href") {
            attrs.insert("href".into(), href.clone());
        }
        return RawNode::Text { text: text.clone(), marks: parse_marks(map.get("marks")), attrs };
    }

    let kind = map
        .get("type")
        .or_else(|| map.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or("block")
        .to_string();
    let id = map
        .get("block_id")
        .or_else(|| map.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let children = match children_value {
        Some(Value::Array(items)) => {
            items.iter().map(|item| from_value_at_depth(item, depth + 1)).collect()
        }
        Some(other) => vec![from_value_at_depth(other, depth + 1)],
        None => Vec::new(),
    };

    RawNode::Element { kind, id, attrs, children }
}

fn parse_marks(value: Option<&Value>) -> Vec<RawMark> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(kind) => Some(RawMark::named(kind.clone())),
            Value::Object(map) => {
                let kind = map.get("type").or_else(|| map.get("kind"))?.as_str()?.to_string();
                let attrs =
                    map.get("attrs").and_then(Value::as_object).cloned().unwrap_or_default();
                Some(RawMark { kind, attrs })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_values_become_text() {
        assert_eq!(RawNode::from_value(&json!("hi")), RawNode::text("hi"));
        assert_eq!(RawNode::from_value(&json!(42)), RawNode::text("42"));
        assert_eq!(RawNode::from_value(&json!(true)), RawNode::text("true"));
        assert_eq!(RawNode::from_value(&Value::Null), RawNode::text(""));
    }

    #[test]
    fn prosemirror_style_object_is_understood() {
        let value = json!({
            "type": "paragraph",
            "attrs": { "id": "p1", "align": null },
            "content": [
                { "type": "text", "text": "go ", "marks": ["bold"] },
                {
                    "type": "text",
                    "text": "here",
                    "marks": [{ "type": "link", "attrs": { "href": "https://x.dev" } }]
                }
            ]
        });

        let RawNode::Element { kind, children, attrs, .. } = RawNode::from_value(&value) else {
            panic!("expected element");
        };
        assert_eq!(kind, "paragraph");
        assert_eq!(attrs.get("id"), Some(&json!("p1")));
        assert_eq!(children.len(), 2);
        let RawNode::Text { marks, .. } = &children[1] else {
            panic!("expected text");
        };
        assert_eq!(marks[0].kind, "link");
        assert_eq!(marks[0].attrs.get("href"), Some(&json!("https://x.dev")));
    }

    #[test]
    fn arrays_become_fragments() {
        let node = RawNode::from_value(&json!(["a", { "type": "hr" }]));
        let RawNode::Element { kind, children, .. } = node else {
            panic!("expected element");
        };
        assert_eq!(kind, "fragment");
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn non_array_content_is_wrapped() {
        let node = RawNode::from_value(&json!({ "type": "quote", "content": "inline" }));
        let RawNode::Element { children, .. } = node else {
            panic!("expected element");
        };
        assert_eq!(children, vec![RawNode::text("inline")]);
    }

    #[test]
    fn garbage_marks_are_skipped() {
        let node = RawNode::from_value(&json!({ "text": "x", "marks": [1, null, "em", {}] }));
        let RawNode::Text { marks, .. } = node else {
            panic!("expected text");
        };
        assert_eq!(marks, vec![RawMark::named("em")]);
    }
}
