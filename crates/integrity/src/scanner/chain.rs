// Chain policy validation against current document order.

use std::collections::HashMap;

use thiserror::Error;

use scriptum_common::types::{ChainData, ChainPolicyKind};

/// Block positions for one scan, built once from `block_order()`.
#[derive(Debug, Clone, Default)]
pub struct BlockOrder {
    positions: HashMap<String, usize>,
}

impl BlockOrder {
    pub fn new(order: &[String]) -> Self {
        let mut positions = HashMap::with_capacity(order.len());
        for (position, block_id) in order.iter().enumerate() {
            positions.entry(block_id.clone()).or_insert(position);
        }
        Self { positions }
    }

    pub fn position(&self, block_id: &str) -> Option<usize> {
        self.positions.get(block_id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl From<&[String]> for BlockOrder {
    fn from(order: &[String]) -> Self {
        Self::new(order)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainViolation {
    #[error("chain has no blocks")]
    Empty,
    #[error("chain block {block_id} is not in the document")]
    MissingBlock { block_id: String },
    #[error("chain block {block_id} does not follow {previous} in document order")]
    OutOfOrder { previous: String, block_id: String },
    #[error("strict adjacency broken: {gap} block(s) between {previous} and {block_id}")]
    NotAdjacent { previous: String, block_id: String, gap: usize },
    #[error("gap of {gap} block(s) between {previous} and {block_id} exceeds max {max}")]
    GapTooLarge { previous: String, block_id: String, gap: usize, max: u32 },
}

/// Check that a chain's blocks exist, appear in strictly increasing document
/// order, and satisfy the per-policy gap rule. Runs before any hash check.
pub fn validate_chain_policy(chain: &ChainData, order: &BlockOrder) -> Result<(), ChainViolation> {
    if chain.block_ids.is_empty() {
        return Err(ChainViolation::Empty);
    }

    let mut previous: Option<(&str, usize)> = None;
    for block_id in &chain.block_ids {
        let position = order
            .position(block_id)
            .ok_or_else(|| ChainViolation::MissingBlock { block_id: block_id.clone() })?;

        if let Some((prev_id, prev_position)) = previous {
            if position <= prev_position {
                return Err(ChainViolation::OutOfOrder {
                    previous: prev_id.to_string(),
                    block_id: block_id.clone(),
                });
            }
            let gap = position - prev_position - 1;
            match chain.policy_kind {
                ChainPolicyKind::StrictAdjacency if gap > 0 => {
                    return Err(ChainViolation::NotAdjacent {
                        previous: prev_id.to_string(),
                        block_id: block_id.clone(),
                        gap,
                    });
                }
                ChainPolicyKind::BoundedGap if gap > chain.max_intervening_blocks as usize => {
                    return Err(ChainViolation::GapTooLarge {
                        previous: prev_id.to_string(),
                        block_id: block_id.clone(),
                        gap,
                        max: chain.max_intervening_blocks,
                    });
                }
                _ => {}
            }
        }
        previous = Some((block_id.as_str(), position));
    }
    Ok(())
}
