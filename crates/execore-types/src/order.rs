//! Order model for the execution core.
//!
//! Prices and sizes are plain `u64` in market precision — all nodes must
//! agree bit-for-bit on every field, so there is no floating point anywhere
//! in the order path. Timestamps are nanoseconds since the UNIX epoch as
//! delivered by the chain time service.

use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, PartyId, RejectReason};

/// Which side of the book an order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// The type of order.
///
/// `Network` orders are synthetic: they are created by the core itself to
/// net off distressed positions and are rejected when submitted externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Network,
}

/// Time-in-force governing order persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good 'til cancelled.
    Gtc,
    /// Good 'til time — requires `expires_at`.
    Gtt,
    /// Good for auction — only accepted while in auction.
    Gfa,
    /// Good for normal trading — rejected during any auction.
    Gfn,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

impl TimeInForce {
    /// Persistent orders rest on the book; non-persistent ones never do.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Gtc | Self::Gtt | Self::Gfa)
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    /// Pegged order removed from the book (e.g. during auction, or its
    /// reference price cannot be resolved).
    Parked,
    Cancelled,
    Expired,
    Filled,
    PartiallyFilled,
    /// Halted by the core (wash trade, close-out, non-persistent remainder).
    Stopped,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Parked => write!(f, "PARKED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Filled => write!(f, "FILLED"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Reference price a pegged order tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeggedReference {
    BestBid,
    BestAsk,
    Mid,
}

/// Peg details carried by a pegged order. The order's `price` is always
/// derived from the reference price plus `offset` at (re)placement time,
/// never authored directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeggedOrder {
    pub reference: PeggedReference,
    /// Signed offset from the reference price, in market precision.
    pub offset: i64,
}

/// An order as tracked by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: MarketId,
    pub party: PartyId,
    pub side: Side,
    pub size: u64,
    pub remaining: u64,
    /// Current price in market precision. Zero while parked.
    pub price: u64,
    /// The price as originally submitted, before any peg repricing.
    pub original_price: u64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    /// Populated on rejection/stop so the event stream always carries an
    /// explicit reason.
    pub reason: Option<RejectReason>,
    pub pegged: Option<PeggedOrder>,
    /// Nanoseconds since epoch.
    pub created_at: i64,
    pub updated_at: i64,
    /// Expiry timestamp in nanoseconds; `0` means no expiry.
    pub expires_at: i64,
    /// Incremented on every amendment.
    pub version: u32,
    /// Free-form client reference, also used to tag synthetic orders.
    pub reference: String,
}

/// Version assigned to every freshly submitted order.
pub const INITIAL_ORDER_VERSION: u32 = 1;

impl Order {
    /// GTT orders (and only those) expire.
    #[must_use]
    pub fn is_expireable(&self) -> bool {
        self.time_in_force == TimeInForce::Gtt && self.expires_at > 0
    }

    /// An order in a terminal status is gone from all registries.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Filled
                | OrderStatus::Stopped
                | OrderStatus::Rejected
        )
    }

    #[must_use]
    pub fn is_pegged(&self) -> bool {
        self.pegged.is_some()
    }
}

/// Confirmation of an order reaching the matching engine: the (possibly
/// amended) order itself, trades produced, and passive orders affected —
/// one passive order per trade, index-aligned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order: Option<Order>,
    pub trades: Vec<crate::Trade>,
    pub passive_orders_affected: Vec<Order>,
}

impl OrderConfirmation {
    #[must_use]
    pub fn from_order(order: Order) -> Self {
        Self {
            order: Some(order),
            trades: Vec::new(),
            passive_orders_affected: Vec::new(),
        }
    }
}

/// Confirmation of a cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationConfirmation {
    pub order: Order,
}

/// An amendment request: all fields optional deltas over the existing order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAmendment {
    pub order_id: Option<OrderId>,
    pub price: Option<u64>,
    /// Added to both size and remaining; may be negative.
    pub size_delta: i64,
    pub time_in_force: Option<TimeInForce>,
    pub expires_at: Option<i64>,
    pub pegged_offset: Option<i64>,
    pub pegged_reference: Option<PeggedReference>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// A plain GTC limit order for tests.
    pub fn dummy_limit(
        market: MarketId,
        party: impl Into<PartyId>,
        side: Side,
        price: u64,
        size: u64,
    ) -> Self {
        Self {
            id: OrderId::deterministic(&[0u8; 32], 0),
            market,
            party: party.into(),
            side,
            size,
            remaining: size,
            price,
            original_price: price,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::Active,
            reason: None,
            pegged: None,
            created_at: 0,
            updated_at: 0,
            expires_at: 0,
            version: INITIAL_ORDER_VERSION,
            reference: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_by_tif() {
        assert!(TimeInForce::Gtc.is_persistent());
        assert!(TimeInForce::Gtt.is_persistent());
        assert!(TimeInForce::Gfa.is_persistent());
        assert!(!TimeInForce::Gfn.is_persistent());
        assert!(!TimeInForce::Ioc.is_persistent());
        assert!(!TimeInForce::Fok.is_persistent());
    }

    #[test]
    fn expireable_requires_gtt_and_expiry() {
        let market = MarketId::from_bytes([1u8; 16]);
        let mut order = Order::dummy_limit(market, "alice", Side::Buy, 100, 10);
        assert!(!order.is_expireable());
        order.time_in_force = TimeInForce::Gtt;
        assert!(!order.is_expireable());
        order.expires_at = 42;
        assert!(order.is_expireable());
    }

    #[test]
    fn finished_statuses() {
        let market = MarketId::from_bytes([1u8; 16]);
        let mut order = Order::dummy_limit(market, "alice", Side::Sell, 100, 10);
        assert!(!order.is_finished());
        order.status = OrderStatus::Parked;
        assert!(!order.is_finished());
        for status in [
            OrderStatus::Cancelled,
            OrderStatus::Expired,
            OrderStatus::Filled,
            OrderStatus::Stopped,
            OrderStatus::Rejected,
        ] {
            order.status = status;
            assert!(order.is_finished(), "{status} should be terminal");
        }
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
