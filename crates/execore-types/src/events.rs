//! Domain events emitted by the execution core.
//!
//! Every state mutation surfaces as an event so downstream consumers
//! (data node, API layer) can rebuild market state without touching the
//! core. Events are emitted in deterministic order within a command.

use serde::{Deserialize, Serialize};

use crate::{
    AuctionTrigger, LiquidityProvision, MarketData, MarketId, MarketState, Order, PartyId, Trade,
};

/// A single domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Any order mutation: creation, fill, amend, park, cancel, reject.
    OrderUpdate(Order),
    /// Batched order mutations from one command, in book order.
    OrderUpdates(Vec<Order>),
    TradeRecorded(Trade),
    AuctionEntered {
        market: MarketId,
        trigger: AuctionTrigger,
        start: i64,
        end: i64,
    },
    AuctionLeft {
        market: MarketId,
        trigger: AuctionTrigger,
    },
    /// A running auction's scheduled end moved out.
    AuctionExtended {
        market: MarketId,
        trigger: AuctionTrigger,
        end: i64,
    },
    MarketStateUpdate {
        market: MarketId,
        state: MarketState,
    },
    MarketDataUpdate(Box<MarketData>),
    LiquidityProvisionUpdate(LiquidityProvision),
    /// A party's position was forcibly closed against the network.
    PartyClosedOut {
        market: MarketId,
        party: PartyId,
    },
    /// Periodic time tick processed.
    MarketTick {
        market: MarketId,
        time: i64,
    },
}

impl MarketEvent {
    /// Short tag for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderUpdate(_) | Self::OrderUpdates(_) => "order",
            Self::TradeRecorded(_) => "trade",
            Self::AuctionEntered { .. } => "auction_entered",
            Self::AuctionLeft { .. } => "auction_left",
            Self::AuctionExtended { .. } => "auction_extended",
            Self::MarketStateUpdate { .. } => "market_state",
            Self::MarketDataUpdate(_) => "market_data",
            Self::LiquidityProvisionUpdate(_) => "liquidity_provision",
            Self::PartyClosedOut { .. } => "closed_out",
            Self::MarketTick { .. } => "tick",
        }
    }
}
