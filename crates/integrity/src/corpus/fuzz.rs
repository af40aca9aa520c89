// Fuzz entry points. Each takes arbitrary input and must return normally;
// the crash-safety suite drives them with random bytes and random trees.

use serde_json::{json, Map, Value};

use scriptum_common::canon::{
    canonicalize_bytes, canonicalize_value, to_canonical_json, CanonOutcome,
};
use scriptum_common::types::{ChainData, ChainPolicyKind, SpanData};

use crate::hash::HashEngine;

use super::rng::Lcg;

/// What one canonicalization trial produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonTrial {
    pub block_count: usize,
    pub truncated: bool,
    pub canonical_json: String,
    pub checksum: String,
}

fn run_trial(engine: &HashEngine, outcome: CanonOutcome) -> CanonTrial {
    CanonTrial {
        block_count: outcome.block_count,
        truncated: outcome.truncated,
        canonical_json: to_canonical_json(&outcome.root),
        checksum: engine.compute_document_checksum_from_canon(&outcome.root).checksum,
    }
}

/// Canonicalize arbitrary bytes and checksum the result.
pub fn fuzz_canonicalize_bytes(engine: &HashEngine, data: &[u8]) -> CanonTrial {
    run_trial(engine, canonicalize_bytes(data))
}

/// Same as `fuzz_canonicalize_bytes` for an already-parsed JSON tree.
pub fn fuzz_canonicalize_value(engine: &HashEngine, value: &Value) -> CanonTrial {
    run_trial(engine, canonicalize_value(value))
}

/// Hash arbitrary text as an anchor and as a chain member. Returns whether
/// every hash verified against itself.
pub fn fuzz_anchor_hashes(engine: &HashEngine, block_id: &str, text: &str) -> bool {
    let span = SpanData {
        span_id: format!("{block_id}.fuzz"),
        block_id: block_id.to_string(),
        text: text.to_string(),
    };
    let context = engine.compute_context_hash(&span);

    let chain = ChainData {
        policy_kind: ChainPolicyKind::BoundedGap,
        max_intervening_blocks: u32::try_from(text.len()).unwrap_or(u32::MAX),
        block_ids: vec![block_id.to_string(), text.to_string()],
    };
    let chain_hash = engine.compute_chain_hash(&chain);

    engine.verify_context_hash(&span, &context.hash)
        && engine.verify_chain_hash(&chain, &chain_hash.hash)
}

const TREE_KINDS: [&str; 6] = ["doc", "paragraph", "heading", "list", "list_item", "quote"];
const TREE_TEXTS: [&str; 8] =
    ["", "plain", "a\r\nb", "e\u{301}", "\u{212b}", "🙂", "\u{0}", "\u{feff}x"];

/// Random loose JSON document tree. Mixes well-formed nodes with junk
/// (wrong types, missing fields, null attrs, stray scalars) that the
/// canonicalizer has to absorb.
pub fn arbitrary_tree(rng: &mut Lcg, max_depth: usize) -> Value {
    arbitrary_node(rng, 0, max_depth)
}

fn arbitrary_node(rng: &mut Lcg, depth: usize, max_depth: usize) -> Value {
    if depth >= max_depth {
        return arbitrary_leaf(rng);
    }
    match rng.next_usize(8) {
        0 => arbitrary_leaf(rng),
        1 => Value::Array(
            (0..rng.next_usize(4)).map(|_| arbitrary_node(rng, depth + 1, max_depth)).collect(),
        ),
        2 => json!({
            "text": TREE_TEXTS[rng.next_usize(TREE_TEXTS.len())],
            "marks": arbitrary_marks(rng),
        }),
        _ => {
            let mut node = Map::new();
            node.insert("type".into(), json!(TREE_KINDS[rng.next_usize(TREE_KINDS.len())]));
            match rng.next_usize(4) {
                0 => {}
                1 => {
                    node.insert("id".into(), json!(format!("b{}", rng.next_usize(16))));
                }
                2 => {
                    node.insert("block_id".into(), json!(rng.next_usize(16)));
                }
                _ => {
                    node.insert("id".into(), Value::Null);
                }
            }
            node.insert("attrs".into(), arbitrary_attrs(rng));
            let children: Vec<Value> =
                (0..rng.next_usize(5)).map(|_| arbitrary_node(rng, depth + 1, max_depth)).collect();
            let key = if rng.next_bool() { "children" } else { "content" };
            node.insert(key.into(), Value::Array(children));
            Value::Object(node)
        }
    }
}

fn arbitrary_leaf(rng: &mut Lcg) -> Value {
    match rng.next_usize(5) {
        0 => Value::Null,
        1 => json!(rng.next_bool()),
        2 => json!(rng.next_u64()),
        3 => json!(-1.5e300),
        _ => json!(TREE_TEXTS[rng.next_usize(TREE_TEXTS.len())]),
    }
}

fn arbitrary_marks(rng: &mut Lcg) -> Value {
    let marks: Vec<Value> = (0..rng.next_usize(4))
        .map(|_| match rng.next_usize(4) {
            0 => json!({ "type": "bold" }),
            1 => json!({ "type": "link", "attrs": { "href": "https://example.com" } }),
            2 => json!("italic"),
            _ => Value::Null,
        })
        .collect();
    Value::Array(marks)
}

fn arbitrary_attrs(rng: &mut Lcg) -> Value {
    match rng.next_usize(4) {
        0 => Value::Null,
        1 => json!("not an object"),
        _ => {
            let mut attrs = Map::new();
            for _ in 0..rng.next_usize(4) {
                let value = match rng.next_usize(3) {
                    0 => Value::Null,
                    1 => json!(rng.next_usize(100)),
                    _ => json!({ "nested": null, "keep": rng.next_bool() }),
                };
                attrs.insert(format!("k{}", rng.next_usize(6)), value);
            }
            Value::Object(attrs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_canonicalize_to_one_paragraph() {
        let trial = fuzz_canonicalize_bytes(&HashEngine::default(), &[0xff, 0xfe, b'{', 0x00]);
        assert_eq!(trial.block_count, 2);
        assert!(!trial.truncated);
        assert_eq!(trial.checksum.len(), 64);
    }

    #[test]
    fn value_and_bytes_paths_agree() {
        let engine = HashEngine::default();
        let tree = arbitrary_tree(&mut Lcg::new(21), 4);
        let from_value = fuzz_canonicalize_value(&engine, &tree);
        let from_bytes = fuzz_canonicalize_bytes(&engine, tree.to_string().as_bytes());
        assert_eq!(from_value, from_bytes);
    }

    #[test]
    fn anchor_hashes_verify_for_odd_text() {
        let engine = HashEngine::default();
        for text in TREE_TEXTS {
            assert!(fuzz_anchor_hashes(&engine, "b1", text));
        }
    }

    #[test]
    fn arbitrary_trees_are_seed_deterministic() {
        let a = arbitrary_tree(&mut Lcg::new(3), 5);
        let b = arbitrary_tree(&mut Lcg::new(3), 5);
        assert_eq!(a, b);
    }
}
