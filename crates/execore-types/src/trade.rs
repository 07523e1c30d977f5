//! Trade model produced by uncrossing and close-out.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, PartyId, Side, TradeId};

/// How a trade came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TradeType {
    /// Normal uncrossing of two resting/incoming orders.
    #[default]
    Default,
    /// Synthetic trade moving a distressed party's position to the network.
    NetworkCloseOutBad,
    /// Synthetic trade distributing the network's position back to
    /// good parties.
    NetworkCloseOutGood,
}

/// Fee amounts charged on one side of a trade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub infrastructure_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidity_fee: Decimal,
}

impl Fee {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.maker_fee + self.infrastructure_fee + self.liquidity_fee
    }
}

/// A single execution between a buyer and a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market: MarketId,
    /// Execution price in market precision.
    pub price: u64,
    pub size: u64,
    pub buyer: PartyId,
    pub seller: PartyId,
    /// Side of the aggressive order.
    pub aggressor: Side,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub trade_type: TradeType,
    /// Fees charged to the buyer; empty during auction uncrossing where
    /// both sides split, and on synthetic network trades.
    pub buyer_fee: Fee,
    pub seller_fee: Fee,
}

impl Trade {
    /// Notional value of the trade, price times size, as a decimal for
    /// fee and market-value accounting.
    #[must_use]
    pub fn value(&self) -> Decimal {
        Decimal::from(self.price) * Decimal::from(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_value() {
        let trade = Trade {
            id: TradeId::deterministic(OrderId::from_bytes([1u8; 16]), 0),
            market: MarketId::from_bytes([2u8; 16]),
            price: 100,
            size: 7,
            buyer: PartyId::new("b"),
            seller: PartyId::new("s"),
            aggressor: Side::Buy,
            buy_order: OrderId::from_bytes([1u8; 16]),
            sell_order: OrderId::from_bytes([3u8; 16]),
            timestamp: 0,
            trade_type: TradeType::Default,
            buyer_fee: Fee::default(),
            seller_fee: Fee::default(),
        };
        assert_eq!(trade.value(), Decimal::from(700));
    }

    #[test]
    fn fee_total() {
        let fee = Fee {
            maker_fee: Decimal::new(5, 1),
            infrastructure_fee: Decimal::new(3, 1),
            liquidity_fee: Decimal::new(2, 1),
        };
        assert_eq!(fee.total(), Decimal::ONE);
    }
}
