// Core annotation and verification types shared across Scriptum crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The exact text slice an annotation was anchored to at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanData {
    pub span_id: String,
    pub block_id: String,
    pub text: String,
}

/// How strictly the blocks of an annotation chain must follow each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicyKind {
    /// Every consecutive pair of chain blocks must be neighbours in document order.
    StrictAdjacency,
    /// Chain blocks must appear in increasing document order, gaps allowed.
    RequiredOrder,
    /// Gaps are allowed up to `max_intervening_blocks` between consecutive blocks.
    BoundedGap,
}

impl ChainPolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrictAdjacency => "strict_adjacency",
            Self::RequiredOrder => "required_order",
            Self::BoundedGap => "bounded_gap",
        }
    }
}

impl fmt::Display for ChainPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered sequence of blocks an annotation spans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainData {
    pub policy_kind: ChainPolicyKind,
    #[serde(default)]
    pub max_intervening_blocks: u32,
    pub block_ids: Vec<String>,
}

/// Output of a context hash computation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextHashResult {
    pub span_id: String,
    pub hash: String,
}

/// Output of a chain hash computation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainHashResult {
    pub hash: String,
    pub block_ids: Vec<String>,
}

/// A block id paired with its Merkle-style digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockDigestEntry {
    pub block_id: String,
    pub digest: String,
}

// ── Scan input ──────────────────────────────────────────────────────

/// One anchored span as persisted by the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanScanData {
    pub span_id: String,
    pub block_id: String,
    /// Hash written once at anchor time. `None` means nothing to compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_context_hash: Option<String>,
}

/// An annotation chain plus the hash written when it was anchored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainScanData {
    #[serde(flatten)]
    pub chain: ChainData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_chain_hash: Option<String>,
}

/// The unit the integrity scanner verifies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnotationScanData {
    pub anno_id: String,
    #[serde(default)]
    pub spans: Vec<SpanScanData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainScanData>,
}

impl AnnotationScanData {
    /// Every block this annotation touches, spans first, then chain blocks.
    /// May contain duplicates.
    pub fn block_ids(&self) -> impl Iterator<Item = &str> {
        let chain_blocks =
            self.chain.iter().flat_map(|chain| chain.chain.block_ids.iter().map(String::as_str));
        self.spans.iter().map(|span| span.block_id.as_str()).chain(chain_blocks)
    }

    pub fn touches_block(&self, block_id: &str) -> bool {
        self.block_ids().any(|id| id == block_id)
    }
}

// ── Scan output ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Recomputed hash differs from the stored one.
    HashMismatch,
    /// Chain blocks no longer satisfy the chain policy.
    ChainViolation,
    /// The span's block or text no longer exists in the current document.
    DirtyMissedSpan,
}

impl MismatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::ChainViolation => "chain_violation",
            Self::DirtyMissedSpan => "dirty_missed_span",
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verification failure. Returned as data, never raised as an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompareMismatch {
    pub kind: MismatchKind,
    pub anno_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub detail: String,
}

impl CompareMismatch {
    pub fn hash_mismatch(anno_id: &str, span_id: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            kind: MismatchKind::HashMismatch,
            anno_id: anno_id.to_string(),
            span_id: span_id.map(str::to_string),
            detail: detail.into(),
        }
    }

    pub fn chain_violation(anno_id: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: MismatchKind::ChainViolation,
            anno_id: anno_id.to_string(),
            span_id: None,
            detail: detail.into(),
        }
    }

    pub fn dirty_missed_span(anno_id: &str, span_id: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: MismatchKind::DirtyMissedSpan,
            anno_id: anno_id.to_string(),
            span_id: Some(span_id.to_string()),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_policy_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ChainPolicyKind::StrictAdjacency).unwrap(),
            "\"strict_adjacency\""
        );
        assert_eq!(ChainPolicyKind::BoundedGap.to_string(), "bounded_gap");
    }

    #[test]
    fn annotation_scan_data_parses_flattened_chain() {
        let value = json!({
            "anno_id": "a1",
            "spans": [{ "span_id": "s1", "block_id": "b1", "stored_context_hash": "abc" }],
            "chain": {
                "policy_kind": "bounded_gap",
                "max_intervening_blocks": 2,
                "block_ids": ["b1", "b4"],
                "stored_chain_hash": "def"
            }
        });

        let anno: AnnotationScanData = serde_json::from_value(value).unwrap();
        let chain = anno.chain.as_ref().unwrap();
        assert_eq!(chain.chain.policy_kind, ChainPolicyKind::BoundedGap);
        assert_eq!(chain.chain.max_intervening_blocks, 2);
        assert_eq!(chain.stored_chain_hash.as_deref(), Some("def"));
        assert_eq!(anno.block_ids().collect::<Vec<_>>(), vec!["b1", "b1", "b4"]);
        assert!(anno.touches_block("b4"));
        assert!(!anno.touches_block("b2"));
    }

    #[test]
    fn mismatch_omits_absent_span_id() {
        let mismatch = CompareMismatch::chain_violation("a1", "block b9 missing");
        let value = serde_json::to_value(&mismatch).unwrap();
        assert_eq!(
            value,
            json!({ "kind": "chain_violation", "anno_id": "a1", "detail": "block b9 missing" })
        );
    }
}
