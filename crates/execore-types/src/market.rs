//! Market lifecycle, trading modes, and configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MarketId, PartyId};

/// Lifecycle state of a market aggregate.
///
/// The transition graph is monotonic except for the Suspended⇄Active
/// toggle driven by monitoring auctions:
/// Proposed → Pending → (Suspended ⇄ Active) → TradingTerminated →
/// Settled | Cancelled | Rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketState {
    Proposed,
    /// Opening auction in progress.
    Pending,
    Active,
    /// In a price or liquidity monitoring auction.
    Suspended,
    TradingTerminated,
    Settled,
    Cancelled,
    Rejected,
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::TradingTerminated => "TRADING_TERMINATED",
            Self::Settled => "SETTLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// How the book is currently trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingMode {
    Continuous,
    OpeningAuction,
    MonitoringAuction,
    NoTrading,
}

/// What put the market into its current auction, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuctionTrigger {
    #[default]
    Unspecified,
    Opening,
    Price,
    Liquidity,
}

impl std::fmt::Display for AuctionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Opening => "OPENING",
            Self::Price => "PRICE",
            Self::Liquidity => "LIQUIDITY",
        };
        write!(f, "{s}")
    }
}

/// Fee factors applied to continuous-trading trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeFactors {
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub infrastructure_fee: Decimal,
    /// Recomputed from the liquidity commitment book; not configured.
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidity_fee: Decimal,
}

impl Default for FeeFactors {
    fn default() -> Self {
        Self {
            maker_fee: Decimal::ZERO,
            infrastructure_fee: Decimal::ZERO,
            liquidity_fee: Decimal::ZERO,
        }
    }
}

/// Static configuration of a market, fixed at creation and tweakable only
/// through the governance parameter hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Instrument code, e.g. "ETH/DEC26".
    pub instrument: String,
    /// Settlement asset symbol.
    pub asset: String,
    /// Number of decimal places in market-precision prices.
    pub decimal_places: u32,
    pub fees: FeeFactors,
    /// Minimum opening auction length, nanoseconds.
    pub opening_auction_duration: i64,
    /// Scheduled end of trading, nanoseconds since epoch; `0` keeps the
    /// market open until an oracle terminates it.
    pub closing_at: i64,
    /// Rolling window over which trade value feeds the market-value-proxy,
    /// nanoseconds.
    pub market_value_window_length: i64,
    /// Interval between mark-to-market settlements, nanoseconds.
    pub mark_to_market_interval: i64,
    /// Interval between liquidity fee distributions, nanoseconds.
    pub liquidity_fee_distribution_interval: i64,
    /// Scaling factor applied to open interest when computing target stake.
    #[serde(with = "rust_decimal::serde::str")]
    pub target_stake_scaling_factor: Decimal,
    /// Supplied/target stake ratio below which a liquidity auction starts.
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidity_triggering_ratio: Decimal,
}

/// Snapshot of derived market figures, refreshed after every command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub mark_price: u64,
    pub best_bid_price: u64,
    pub best_bid_volume: u64,
    pub best_offer_price: u64,
    pub best_offer_volume: u64,
    /// Static mid prices as seen by buy-side and sell-side pegs; they
    /// differ by the rounding of the half tick.
    pub mid_price_buy: u64,
    pub mid_price_sell: u64,
    /// Uncross price and volume the auction would produce right now;
    /// zero outside auctions.
    pub indicative_price: u64,
    pub indicative_volume: u64,
    pub open_interest: u64,
    pub market_state: Option<MarketState>,
    pub trading_mode: Option<TradingMode>,
    pub auction_trigger: AuctionTrigger,
    /// Auction window, nanoseconds; zero when not in auction.
    pub auction_start: i64,
    pub auction_end: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub target_stake: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub supplied_stake: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub market_value_proxy: Decimal,
    /// Sorted by party so every node reports the same sequence.
    pub liquidity_provider_fee_shares: Vec<LiquidityProviderFeeShare>,
}

/// One liquidity provider's slice of the fee pot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityProviderFeeShare {
    pub party: PartyId,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity_like_share: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub average_entry_valuation: Decimal,
}

#[cfg(any(test, feature = "test-helpers"))]
impl MarketConfig {
    /// A minimal configuration for tests: no fees, one-second opening
    /// auction, hour-long value window.
    pub fn dummy(id: MarketId) -> Self {
        Self {
            id,
            instrument: "TEST/DEC26".to_owned(),
            asset: "USDT".to_owned(),
            decimal_places: 0,
            fees: FeeFactors::default(),
            opening_auction_duration: 1_000_000_000,
            closing_at: 0,
            market_value_window_length: 3_600_000_000_000,
            mark_to_market_interval: 1_000_000_000,
            liquidity_fee_distribution_interval: 1_000_000_000,
            target_stake_scaling_factor: Decimal::ONE,
            liquidity_triggering_ratio: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(MarketState::TradingTerminated.to_string(), "TRADING_TERMINATED");
        assert_eq!(MarketState::Active.to_string(), "ACTIVE");
    }

    #[test]
    fn config_serde_round_trip() {
        let cfg = MarketConfig::dummy(MarketId::from_bytes([9u8; 16]));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MarketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
