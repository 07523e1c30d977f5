//! Deterministic per-command ID generation.
//!
//! Every validating node replays the same command stream, so IDs must be a
//! pure function of the command's content and the market — never of wall
//! clock, RNG, or shared counters. A fresh [`IdGenerator`] is seeded for
//! each command from the transaction hash and the market ID, threaded
//! through whatever that command touches, and dropped when the command
//! completes.

use execore_types::{MarketId, OrderId, TradeId};
use sha2::{Digest, Sha256};

/// Generator for order and trade IDs within a single command.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: [u8; 32],
    sequence: u64,
}

impl IdGenerator {
    /// Seeds a generator from the command's content hash and the market ID.
    #[must_use]
    pub fn new(block_hash: &[u8], market: MarketId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"execore:idgen:v1:");
        hasher.update(block_hash);
        hasher.update(market.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&hasher.finalize());
        Self { seed, sequence: 0 }
    }

    /// Next order ID in this command's sequence.
    pub fn next_order_id(&mut self) -> OrderId {
        let id = OrderId::deterministic(&self.seed, self.sequence);
        self.sequence += 1;
        id
    }

    /// Trade IDs derive from the aggressive order rather than the shared
    /// sequence, so a trade's ID does not depend on how many unrelated
    /// orders the command generated before it.
    #[must_use]
    pub fn trade_id(aggressor: OrderId, fill_index: u64) -> TradeId {
        TradeId::deterministic(aggressor, fill_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketId {
        MarketId::from_bytes([7u8; 16])
    }

    #[test]
    fn same_inputs_same_ids() {
        let mut a = IdGenerator::new(b"block-1", market());
        let mut b = IdGenerator::new(b"block-1", market());
        for _ in 0..5 {
            assert_eq!(a.next_order_id(), b.next_order_id());
        }
    }

    #[test]
    fn sequence_advances() {
        let mut g = IdGenerator::new(b"block-1", market());
        assert_ne!(g.next_order_id(), g.next_order_id());
    }

    #[test]
    fn different_blocks_diverge() {
        let mut a = IdGenerator::new(b"block-1", market());
        let mut b = IdGenerator::new(b"block-2", market());
        assert_ne!(a.next_order_id(), b.next_order_id());
    }

    #[test]
    fn different_markets_diverge() {
        let mut a = IdGenerator::new(b"block-1", market());
        let mut b = IdGenerator::new(b"block-1", MarketId::from_bytes([8u8; 16]));
        assert_ne!(a.next_order_id(), b.next_order_id());
    }
}
