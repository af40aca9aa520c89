// Content-addressed hashing over anchors and document structure.
//
// Four hash families, each a wire-format tag line followed by a body:
//
//   span context   SPAN_V2\nblock_id=<id>\ntext=<LF+NFC text>
//   chain          CHAIN_V2\npolicy=<kind>:<max>\nblocks=<id,id,...>
//   block digest   BLOCK_V1\n<stable JSON {block_id,type,attrs,inline,children}>
//   doc checksum   DOC_V1\n<stable JSON [{block_id,digest},...] sorted by block_id>
//
// Block digests are Merkle-like: a block's `children` field holds its child
// block digests, so a parent digest commits to its whole subtree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use scriptum_common::canon::{CanonBlock, CanonText};
use scriptum_common::json::stable::stable_stringify;
use scriptum_common::text::normalize::normalize_anchor_text;
use scriptum_common::types::{
    BlockDigestEntry, ChainData, ChainHashResult, ContextHashResult, SpanData,
};

use crate::config::HashConfig;

pub mod backend;

pub use backend::DigestBackend;

pub const SPAN_FORMAT_TAG: &str = "SPAN_V2";
pub const CHAIN_FORMAT_TAG: &str = "CHAIN_V2";
pub const BLOCK_FORMAT_TAG: &str = "BLOCK_V1";
pub const DOC_FORMAT_TAG: &str = "DOC_V1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashEngineError {
    #[error("digest backend `{0}` is not cryptographic and is rejected by this configuration")]
    InsecureBackendRejected(DigestBackend),
}

/// Everything a block digest commits to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockDigestInput {
    pub block_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default)]
    pub inline: Vec<CanonText>,
    /// Digests of the block's direct child blocks, in document order.
    #[serde(default)]
    pub children: Vec<String>,
}

impl BlockDigestInput {
    pub fn from_canon(block: &CanonBlock, child_digests: Vec<String>) -> Self {
        Self {
            block_id: block.block_id.clone(),
            kind: block.kind.clone(),
            attrs: block.attrs.clone(),
            inline: block.inline_segments().cloned().collect(),
            children: child_digests,
        }
    }
}

/// Tier 2 result: checksum plus every block digest it was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChecksum {
    pub checksum: String,
    /// Block digests in document pre-order.
    pub digests: Vec<BlockDigestEntry>,
}

/// Hash engine bound to one digest backend for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashEngine {
    backend: DigestBackend,
}

impl HashEngine {
    pub fn new(backend: DigestBackend) -> Self {
        if !backend.is_cryptographic() {
            warn!(%backend, "hash engine using non-cryptographic digest backend");
        }
        Self { backend }
    }

    /// Build from configuration, enforcing the production guard.
    pub fn from_config(config: &HashConfig) -> Result<Self, HashEngineError> {
        if config.require_cryptographic && !config.backend.is_cryptographic() {
            return Err(HashEngineError::InsecureBackendRejected(config.backend));
        }
        Ok(Self::new(config.backend))
    }

    pub fn backend(&self) -> DigestBackend {
        self.backend
    }

    // ── Span context hashes ────────────────────────────────────────

    pub fn compute_context_hash(&self, span: &SpanData) -> ContextHashResult {
        ContextHashResult {
            span_id: span.span_id.clone(),
            hash: self.context_hash(&span.block_id, &span.text),
        }
    }

    /// Context hash for a block/text pair without building a `SpanData`.
    pub fn context_hash(&self, block_id: &str, text: &str) -> String {
        let payload = format!(
            "{SPAN_FORMAT_TAG}\nblock_id={block_id}\ntext={}",
            normalize_anchor_text(text)
        );
        self.backend.digest_hex(payload.as_bytes())
    }

    /// Hash many independent spans. Output order matches input order.
    pub fn compute_context_hash_batch(&self, spans: &[SpanData]) -> Vec<ContextHashResult> {
        spans.iter().map(|span| self.compute_context_hash(span)).collect()
    }

    pub fn verify_context_hash(&self, span: &SpanData, expected: &str) -> bool {
        self.context_hash(&span.block_id, &span.text) == expected
    }

    // ── Chain hashes ───────────────────────────────────────────────

    pub fn compute_chain_hash(&self, chain: &ChainData) -> ChainHashResult {
        let payload = format!(
            "{CHAIN_FORMAT_TAG}\npolicy={}:{}\nblocks={}",
            chain.policy_kind,
            chain.max_intervening_blocks,
            chain.block_ids.join(",")
        );
        ChainHashResult {
            hash: self.backend.digest_hex(payload.as_bytes()),
            block_ids: chain.block_ids.clone(),
        }
    }

    pub fn verify_chain_hash(&self, chain: &ChainData, expected: &str) -> bool {
        self.compute_chain_hash(chain).hash == expected
    }

    // ── Block digests ──────────────────────────────────────────────

    pub fn compute_block_digest(&self, input: &BlockDigestInput) -> String {
        let body = json!({
            "block_id": input.block_id,
            "type": input.kind,
            "attrs": input.attrs,
            "inline": input.inline.iter().map(CanonText::to_value).collect::<Vec<_>>(),
            "children": input.children,
        });
        let payload = format!("{BLOCK_FORMAT_TAG}\n{}", stable_stringify(&body));
        self.backend.digest_hex(payload.as_bytes())
    }

    /// Tier 2: recompute every block digest of a canonical tree bottom-up.
    /// Entries come back in document pre-order, root first.
    pub fn compute_block_digest_tree(&self, root: &CanonBlock) -> Vec<BlockDigestEntry> {
        let mut out = Vec::new();
        self.digest_subtree(root, &mut out);
        out
    }

    fn digest_subtree(&self, block: &CanonBlock, out: &mut Vec<BlockDigestEntry>) -> String {
        let slot = out.len();
        out.push(BlockDigestEntry { block_id: block.block_id.clone(), digest: String::new() });

        let child_digests: Vec<String> =
            block.child_blocks().map(|child| self.digest_subtree(child, out)).collect();
        let digest = self.compute_block_digest(&BlockDigestInput::from_canon(block, child_digests));
        out[slot].digest = digest.clone();
        digest
    }

    // ── Document checksums ─────────────────────────────────────────

    /// Tier 1: checksum over precomputed block digests.
    pub fn compute_document_checksum(&self, entries: &[BlockDigestEntry]) -> String {
        let mut sorted: Vec<&BlockDigestEntry> = entries.iter().collect();
        sorted.sort();
        let body = Value::Array(
            sorted
                .into_iter()
                .map(|entry| json!({ "block_id": entry.block_id, "digest": entry.digest }))
                .collect(),
        );
        let payload = format!("{DOC_FORMAT_TAG}\n{}", stable_stringify(&body));
        self.backend.digest_hex(payload.as_bytes())
    }

    /// Tier 2: recompute all digests from canonical nodes, then checksum them.
    pub fn compute_document_checksum_from_canon(&self, root: &CanonBlock) -> DocumentChecksum {
        let digests = self.compute_block_digest_tree(root);
        let checksum = self.compute_document_checksum(&digests);
        DocumentChecksum { checksum, digests }
    }

    pub fn verify_document_checksum(&self, entries: &[BlockDigestEntry], expected: &str) -> bool {
        self.compute_document_checksum(entries) == expected
    }
}
