//! Market snapshots.
//!
//! A snapshot captures every piece of market-owned deterministic state in
//! a serializable form. Restoring a snapshot into a market with an
//! identically restored book yields a state hash equal to the one taken
//! before the save, which is how validating nodes prove they resumed from
//! the same point.
//!
//! Hashing goes through canonical JSON: every collection in the captured
//! state is ordered (`BTreeMap`/`BTreeSet`/`Vec`), so serialization is
//! byte-stable across platforms.

use std::collections::BTreeSet;

use execore_types::{ExecoreError, MarketConfig, MarketState, OrderId, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auction::AuctionState;
use crate::equity_shares::EquityShares;
use crate::expiring_orders::ExpiringOrders;
use crate::fee_splitter::FeeSplitter;
use crate::liquidity::LiquidityEngine;
use crate::market::{Market, RestoredComponents};
use crate::pegged_orders::PeggedOrders;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub version: u32,
    pub config: MarketConfig,
    pub state: MarketState,
    pub auction: AuctionState,
    pub equity_shares: EquityShares,
    pub fee_splitter: FeeSplitter,
    pub pegged: PeggedOrders,
    pub expiring: ExpiringOrders,
    pub liquidity: LiquidityEngine,
    pub pegged_live: BTreeSet<OrderId>,
    pub mark_price: u64,
    pub liquidity_fee: Decimal,
    pub market_value_proxy: Decimal,
    pub target_stake: Decimal,
    pub next_mtm: i64,
    pub last_fee_distribution: i64,
    pub current_time: i64,
}

impl MarketSnapshot {
    #[must_use]
    pub fn capture(market: &Market) -> Self {
        let (config, state, auction, equity_shares, fee_splitter, pegged, expiring, liquidity) =
            market.components();
        let extra = market.snapshot_extra();
        Self {
            version: SNAPSHOT_VERSION,
            config: config.clone(),
            state,
            auction: auction.clone(),
            equity_shares: equity_shares.clone(),
            fee_splitter: fee_splitter.clone(),
            pegged: pegged.clone(),
            expiring: expiring.clone(),
            liquidity: liquidity.clone(),
            pegged_live: extra.pegged_live.clone(),
            mark_price: extra.mark_price,
            liquidity_fee: extra.liquidity_fee,
            market_value_proxy: extra.last_mvp,
            target_stake: extra.last_target_stake,
            next_mtm: extra.next_mtm,
            last_fee_distribution: extra.last_fee_distribution,
            current_time: extra.current_time,
        }
    }

    /// Loads the captured state back into a market whose configuration
    /// matches. The book is restored separately by its owner.
    pub fn restore_into(self, market: &mut Market) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ExecoreError::Internal(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        if self.config.id != market.id() {
            return Err(ExecoreError::Internal(format!(
                "snapshot for market {} restored into market {}",
                self.config.id,
                market.id()
            )));
        }
        market.restore_components(RestoredComponents {
            state: self.state,
            auction: self.auction,
            equity_shares: self.equity_shares,
            fee_splitter: self.fee_splitter,
            pegged: self.pegged,
            expiring: self.expiring,
            liquidity: self.liquidity,
            pegged_live: self.pegged_live,
            mark_price: self.mark_price,
            liquidity_fee: self.liquidity_fee,
            last_mvp: self.market_value_proxy,
            last_target_stake: self.target_stake,
            next_mtm: self.next_mtm,
            last_fee_distribution: self.last_fee_distribution,
            current_time: self.current_time,
        });
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ExecoreError::Internal(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExecoreError::Internal(e.to_string()))
    }

    /// SHA-256 over the canonical serialization plus the book's own hash.
    #[must_use]
    pub fn hash(&self, book_hash: [u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"execore:snapshot:v1:");
        // Infallible for this type: all keys are strings, no non-finite
        // floats anywhere in the captured state.
        let json = serde_json::to_vec(self).unwrap_or_default();
        hasher.update(&json);
        hasher.update(book_hash);
        hasher.finalize().into()
    }
}

/// Combined hash of a market's deterministic state and its book.
pub(crate) fn market_state_hash(market: &Market) -> [u8; 32] {
    MarketSnapshot::capture(market).hash(market.book_hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use execore_types::MarketId;

    fn dummy_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            version: SNAPSHOT_VERSION,
            config: MarketConfig::dummy(MarketId::from_bytes([3u8; 16])),
            state: MarketState::Active,
            auction: AuctionState::opening(0, 1_000_000_000),
            equity_shares: EquityShares::new(Decimal::ZERO),
            fee_splitter: FeeSplitter::new(),
            pegged: PeggedOrders::new(),
            expiring: ExpiringOrders::new(),
            liquidity: LiquidityEngine::new(),
            pegged_live: BTreeSet::new(),
            mark_price: 100,
            liquidity_fee: Decimal::ZERO,
            market_value_proxy: Decimal::ZERO,
            target_stake: Decimal::ZERO,
            next_mtm: 5,
            last_fee_distribution: 0,
            current_time: 4,
        }
    }

    #[test]
    fn json_round_trip_preserves_hash() {
        let snapshot = dummy_snapshot();
        let json = snapshot.to_json().unwrap();
        let back = MarketSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot.hash([0u8; 32]), back.hash([0u8; 32]));
    }

    #[test]
    fn hash_depends_on_book() {
        let snapshot = dummy_snapshot();
        assert_ne!(snapshot.hash([0u8; 32]), snapshot.hash([1u8; 32]));
    }

    #[test]
    fn hash_depends_on_state() {
        let a = dummy_snapshot();
        let mut b = dummy_snapshot();
        b.mark_price = 101;
        assert_ne!(a.hash([0u8; 32]), b.hash([0u8; 32]));
    }
}
