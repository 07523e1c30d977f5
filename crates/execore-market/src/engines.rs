//! Collaborator contracts of the market orchestrator.
//!
//! The orchestrator owns no book, ledger, or risk model of its own — it
//! coordinates these engines and is the only writer to any of them for its
//! market. Every contract here is deterministic: same calls in the same
//! order produce the same results on every node. Implementations must not
//! consult wall clock, RNG, or any state outside what these calls pass in.

use execore_types::{
    CancellationConfirmation, MarketId, Order, OrderConfirmation, OrderId, PartyId, Result, Trade,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auction::AuctionState;

/// A party's net position as tracked by the position engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPosition {
    pub party: PartyId,
    /// Net open volume; positive long, negative short.
    pub size: i64,
    /// Potential buy volume from resting orders.
    pub buy: u64,
    /// Potential sell volume from resting orders.
    pub sell: u64,
    /// Volume-weighted entry price in market precision.
    pub price: u64,
}

impl MarketPosition {
    /// Worst-case exposure: open volume plus everything resting.
    #[must_use]
    pub fn exposure(&self) -> u64 {
        let long = self.size.max(0).unsigned_abs() + self.buy;
        let short = self.size.min(0).unsigned_abs() + self.sell;
        long.max(short)
    }
}

/// What a collateral movement is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    MtmLoss,
    MtmWin,
    MarginLow,
    MarginHigh,
    /// General → bond, funding a liquidity commitment.
    BondLow,
    /// Bond → general, releasing commitment collateral.
    BondHigh,
    BondSlashing,
    MakerFeePay,
    MakerFeeReceive,
    InfrastructureFeePay,
    LiquidityFeePay,
    LiquidityFeeDistribute,
}

/// A single requested or applied collateral movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub party: PartyId,
    pub kind: TransferKind,
    /// Amount in the settlement asset, market precision.
    pub amount: u64,
}

/// Outcome of re-evaluating one party's margin after settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginUpdate {
    pub party: PartyId,
    /// Movement needed to restore the margin level, if any.
    pub transfer: Option<Transfer>,
    /// Margin could not be restored from general + margin accounts; the
    /// party must be closed out.
    pub closed: bool,
    /// Bond account must be slashed to cover the shortfall.
    pub bond_penalty: Option<Transfer>,
}

/// Risk factors for target-stake computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub long: Decimal,
    pub short: Decimal,
}

/// Price-level matching engine. The book is mode-aware: while in auction
/// it accumulates orders without crossing and reports indicative uncross
/// figures instead of trading.
pub trait MatchingBook {
    fn submit_order(&mut self, order: &mut Order) -> Result<OrderConfirmation>;
    fn cancel_order(&mut self, id: OrderId) -> Result<CancellationConfirmation>;
    /// In-place amendment preserving time priority. The amended order must
    /// keep its price and may only shrink.
    fn amend_order(&mut self, amended: &Order) -> Result<()>;
    fn order_by_id(&self, id: OrderId) -> Result<Order>;
    fn orders_for_party(&self, party: &PartyId) -> Vec<Order>;
    /// Dry run: the trades `order` would produce right now, without
    /// touching the book.
    fn get_trades(&self, order: &Order) -> Result<Vec<Trade>>;
    /// Switches to auction accumulation; returns resting orders the mode
    /// switch invalidates (GFN).
    fn enter_auction(&mut self) -> Vec<Order>;
    /// Uncrosses and switches back to continuous; returns one confirmation
    /// per uncrossing aggressor plus orders to cancel (unfilled GFA).
    fn leave_auction(&mut self, now: i64) -> Result<(Vec<OrderConfirmation>, Vec<Order>)>;
    fn best_static_bid_price_and_volume(&self) -> Option<(u64, u64)>;
    fn best_static_offer_price_and_volume(&self) -> Option<(u64, u64)>;
    /// Indicative uncross (price, volume) while in auction.
    fn indicative_price_and_volume(&self) -> (u64, u64);
    fn remove_distressed_orders(&mut self, parties: &[PartyId]) -> Result<Vec<Order>>;
    /// Content hash over the full book, for cross-node consistency checks.
    fn state_hash(&self) -> [u8; 32];
}

/// Account ledger shared across markets. All amounts are market precision
/// in the market's settlement asset.
pub trait CollateralLedger {
    fn has_general_account(&self, party: &PartyId, asset: &str) -> bool;
    /// Creates the margin account if missing.
    fn ensure_margin_account(&mut self, market: &MarketId, party: &PartyId, asset: &str)
    -> Result<()>;
    /// Creates the bond account if missing; returns its balance.
    fn ensure_bond_account(
        &mut self,
        market: &MarketId,
        party: &PartyId,
        asset: &str,
    ) -> Result<u64>;
    /// Applies a margin movement between general and margin accounts.
    /// Fails when the general account cannot cover a `MarginLow`.
    fn margin_update(
        &mut self,
        market: &MarketId,
        transfer: &Transfer,
        asset: &str,
    ) -> Result<Transfer>;
    /// Settles MTM wins and losses through the market settlement account.
    /// Returns the applied movements; loss shortfalls come out of margin,
    /// then insurance.
    fn mark_to_market(
        &mut self,
        market: &MarketId,
        transfers: &[Transfer],
        asset: &str,
    ) -> Result<Vec<Transfer>>;
    /// Applies a bond movement: funding from general (`BondLow`), release
    /// back to general (`BondHigh`), or a slashing penalty to insurance.
    fn bond_update(&mut self, market: &MarketId, transfer: &Transfer, asset: &str) -> Result<()>;
    /// Routes trading fees to the fee accounts.
    fn transfer_fees(
        &mut self,
        market: &MarketId,
        asset: &str,
        fees: &[Transfer],
    ) -> Result<Vec<Transfer>>;
    /// Accrued liquidity fees waiting for distribution.
    fn liquidity_fee_balance(&self, market: &MarketId, asset: &str) -> u64;
    /// Empties a closed-out party's margin account into insurance and
    /// confiscates any bond.
    fn clear_party(&mut self, market: &MarketId, party: &PartyId, asset: &str) -> Result<()>;
    /// Current (margin, general) balances for a party on this market.
    fn margin_and_general_balance(
        &self,
        market: &MarketId,
        party: &PartyId,
        asset: &str,
    ) -> (u64, u64);
}

/// Margin model.
pub trait RiskEngine {
    /// Pre-trade margin check for a submission or amendment. `Ok(None)`
    /// means current margin suffices; `Ok(Some(t))` requires the transfer
    /// to be applied first; `Err` rejects the order.
    fn check_margin(
        &self,
        position: &MarketPosition,
        order: &Order,
        mark_price: u64,
    ) -> Result<Option<Transfer>>;
    /// Post-settlement margin re-evaluation for every affected party.
    fn update_margins(
        &self,
        positions: &[MarketPosition],
        mark_price: u64,
        margin_balances: &dyn Fn(&PartyId) -> (u64, u64),
    ) -> Vec<MarginUpdate>;
    /// After distressed orders are pulled, which of `positions` still
    /// cannot meet margin and must be netted off.
    fn expect_margins(
        &self,
        positions: &[MarketPosition],
        mark_price: u64,
        margin_balances: &dyn Fn(&PartyId) -> (u64, u64),
    ) -> Vec<PartyId>;
    fn factors(&self) -> RiskFactors;
}

/// Per-party position bookkeeping.
pub trait PositionTracker {
    fn register_order(&mut self, order: &Order);
    fn unregister_order(&mut self, order: &Order);
    fn amend_order(&mut self, original: &Order, amended: &Order);
    /// Applies a trade to buyer and seller; returns the affected
    /// positions (buyer first).
    fn update(&mut self, trade: &Trade) -> Vec<MarketPosition>;
    fn positions(&self) -> Vec<MarketPosition>;
    fn position(&self, party: &PartyId) -> Option<MarketPosition>;
    fn remove_distressed(&mut self, parties: &[PartyId]);
    fn open_interest(&self) -> u64;
}

/// Accumulates trades between settlements and produces MTM transfers.
pub trait SettlementEngine {
    fn add_trade(&mut self, trade: &Trade);
    /// Transfers settling every position to `mark_price`, losses before
    /// wins.
    fn settle_mtm(&mut self, mark_price: u64, positions: &[MarketPosition]) -> Vec<Transfer>;
    fn remove_distressed(&mut self, parties: &[PartyId]);
}

/// Price monitoring: may flag or extend an auction via the auction state.
pub trait PriceMonitor {
    /// Evaluates a candidate trade price. `persistent` tells the monitor
    /// whether the triggering order could rest on the book through an
    /// auction it starts.
    fn check_price(
        &mut self,
        auction: &mut AuctionState,
        now: i64,
        price: u64,
        volume: u64,
        persistent: bool,
    ) -> Result<()>;
    fn on_time_update(&mut self, now: i64);
    /// Current min/max valid price bounds for market data.
    fn bounds(&self) -> Vec<(u64, u64)>;
}

/// Liquidity monitoring: starts or ends liquidity auctions based on
/// supplied vs target stake.
pub trait LiquidityMonitor {
    #[allow(clippy::too_many_arguments)]
    fn check_liquidity(
        &mut self,
        auction: &mut AuctionState,
        now: i64,
        supplied_stake: Decimal,
        target_stake: Decimal,
        indicative_uncross: (u64, u64),
        best_static_bid: Option<(u64, u64)>,
        best_static_offer: Option<(u64, u64)>,
    );
}

/// Target stake from open interest, mark price, and risk factors.
pub trait TargetStakeCalculator {
    fn update_open_interest(&mut self, now: i64, open_interest: u64);
    fn target_stake(&mut self, now: i64, mark_price: u64, factors: RiskFactors) -> Decimal;
}

/// Append-only event sink; fire-and-forget from the core's perspective.
pub trait Broker {
    fn send(&mut self, event: execore_types::MarketEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_takes_worst_side() {
        let pos = MarketPosition {
            party: PartyId::new("p"),
            size: -5,
            buy: 3,
            sell: 10,
            price: 100,
        };
        // Short side: 5 open + 10 potential = 15; long side: 3.
        assert_eq!(pos.exposure(), 15);

        let pos = MarketPosition {
            party: PartyId::new("p"),
            size: 7,
            buy: 4,
            sell: 1,
            price: 100,
        };
        assert_eq!(pos.exposure(), 11);
    }
}
