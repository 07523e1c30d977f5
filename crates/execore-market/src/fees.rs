//! Trading-fee calculation.
//!
//! Continuous trading: the aggressor pays maker + infrastructure +
//! liquidity fees; the maker fee is forwarded to the passive party.
//! Auction uncrossing: there is no aggressor, so each side pays half of
//! the infrastructure and liquidity fees and no maker fee at all.
//! Synthetic network trades carry no fees here; close-out fees are routed
//! separately by the orchestrator.
//!
//! Fee amounts round up: the network never undercharges.

use execore_types::{Fee, FeeFactors, Side, Trade};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::engines::{Transfer, TransferKind};

#[derive(Debug, Clone)]
pub struct FeeEngine {
    factors: FeeFactors,
}

impl FeeEngine {
    #[must_use]
    pub fn new(factors: FeeFactors) -> Self {
        Self { factors }
    }

    pub fn set_liquidity_fee(&mut self, fee: Decimal) {
        self.factors.liquidity_fee = fee;
    }

    #[must_use]
    pub fn liquidity_fee(&self) -> Decimal {
        self.factors.liquidity_fee
    }

    #[must_use]
    pub fn factors(&self) -> &FeeFactors {
        &self.factors
    }

    fn fee_on(&self, value: Decimal) -> Fee {
        Fee {
            maker_fee: value * self.factors.maker_fee,
            infrastructure_fee: value * self.factors.infrastructure_fee,
            liquidity_fee: value * self.factors.liquidity_fee,
        }
    }

    /// Stamps fees on continuous-trading trades and returns the collateral
    /// movements: the aggressor of each trade pays everything, the passive
    /// side receives the maker fee.
    pub fn calculate_continuous(&self, trades: &mut [Trade]) -> Vec<Transfer> {
        let mut transfers = Vec::new();
        for trade in trades.iter_mut() {
            let fee = self.fee_on(trade.value());
            let (aggressor, passive) = match trade.aggressor {
                Side::Buy => (&trade.buyer, &trade.seller),
                Side::Sell => (&trade.seller, &trade.buyer),
            };
            transfers.push(Transfer {
                party: aggressor.clone(),
                kind: TransferKind::MakerFeePay,
                amount: ceil_u64(fee.maker_fee),
            });
            transfers.push(Transfer {
                party: aggressor.clone(),
                kind: TransferKind::InfrastructureFeePay,
                amount: ceil_u64(fee.infrastructure_fee),
            });
            transfers.push(Transfer {
                party: aggressor.clone(),
                kind: TransferKind::LiquidityFeePay,
                amount: ceil_u64(fee.liquidity_fee),
            });
            transfers.push(Transfer {
                party: passive.clone(),
                kind: TransferKind::MakerFeeReceive,
                amount: ceil_u64(fee.maker_fee),
            });
            match trade.aggressor {
                Side::Buy => trade.buyer_fee = fee,
                Side::Sell => trade.seller_fee = fee,
            }
        }
        transfers
    }

    /// Stamps fees on auction-uncross trades: infrastructure and liquidity
    /// fees split evenly, no maker fee.
    pub fn calculate_auction(&self, trades: &mut [Trade]) -> Vec<Transfer> {
        let two = Decimal::TWO;
        let mut transfers = Vec::new();
        for trade in trades.iter_mut() {
            let value = trade.value();
            let half = Fee {
                maker_fee: Decimal::ZERO,
                infrastructure_fee: value * self.factors.infrastructure_fee / two,
                liquidity_fee: value * self.factors.liquidity_fee / two,
            };
            for party in [&trade.buyer, &trade.seller] {
                transfers.push(Transfer {
                    party: party.clone(),
                    kind: TransferKind::InfrastructureFeePay,
                    amount: ceil_u64(half.infrastructure_fee),
                });
                transfers.push(Transfer {
                    party: party.clone(),
                    kind: TransferKind::LiquidityFeePay,
                    amount: ceil_u64(half.liquidity_fee),
                });
            }
            trade.buyer_fee = half.clone();
            trade.seller_fee = half;
        }
        transfers
    }
}

fn ceil_u64(value: Decimal) -> u64 {
    value.ceil().to_u64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use execore_types::{MarketId, OrderId, PartyId, TradeId, TradeType};

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn trade(price: u64, size: u64, aggressor: Side) -> Trade {
        Trade {
            id: TradeId::deterministic(OrderId::from_bytes([1u8; 16]), 0),
            market: MarketId::from_bytes([2u8; 16]),
            price,
            size,
            buyer: PartyId::new("buyer"),
            seller: PartyId::new("seller"),
            aggressor,
            buy_order: OrderId::from_bytes([1u8; 16]),
            sell_order: OrderId::from_bytes([3u8; 16]),
            timestamp: 0,
            trade_type: TradeType::Default,
            buyer_fee: Fee::default(),
            seller_fee: Fee::default(),
        }
    }

    fn engine() -> FeeEngine {
        FeeEngine::new(FeeFactors {
            maker_fee: dec("0.0002"),
            infrastructure_fee: dec("0.0005"),
            liquidity_fee: dec("0.001"),
        })
    }

    #[test]
    fn continuous_aggressor_pays_everything() {
        let mut trades = vec![trade(1000, 10, Side::Buy)];
        let transfers = engine().calculate_continuous(&mut trades);

        // value = 10000: maker 2, infra 5, liquidity 10
        assert_eq!(trades[0].buyer_fee.maker_fee, dec("2"));
        assert_eq!(trades[0].seller_fee, Fee::default());

        let pay: Vec<_> = transfers
            .iter()
            .filter(|t| t.party == PartyId::new("buyer"))
            .collect();
        assert_eq!(pay.len(), 3);
        assert_eq!(
            pay.iter().map(|t| t.amount).sum::<u64>(),
            2 + 5 + 10
        );
        let receive: Vec<_> = transfers
            .iter()
            .filter(|t| t.kind == TransferKind::MakerFeeReceive)
            .collect();
        assert_eq!(receive.len(), 1);
        assert_eq!(receive[0].party, PartyId::new("seller"));
        assert_eq!(receive[0].amount, 2);
    }

    #[test]
    fn fee_amounts_round_up() {
        // value = 999: maker fee 0.1998 → 1
        let mut trades = vec![trade(999, 1, Side::Sell)];
        let transfers = engine().calculate_continuous(&mut trades);
        let maker = transfers
            .iter()
            .find(|t| t.kind == TransferKind::MakerFeePay)
            .unwrap();
        assert_eq!(maker.amount, 1);
        assert_eq!(maker.party, PartyId::new("seller"));
    }

    #[test]
    fn auction_splits_and_skips_maker() {
        let mut trades = vec![trade(1000, 10, Side::Buy)];
        let transfers = engine().calculate_auction(&mut trades);

        assert_eq!(trades[0].buyer_fee.maker_fee, Decimal::ZERO);
        assert_eq!(trades[0].buyer_fee.liquidity_fee, dec("5"));
        assert_eq!(trades[0].buyer_fee, trades[0].seller_fee);

        assert!(transfers.iter().all(|t| t.kind != TransferKind::MakerFeePay));
        // infra 5/2 → ceil 3 each, liquidity 10/2 → 5 each
        let buyer_total: u64 = transfers
            .iter()
            .filter(|t| t.party == PartyId::new("buyer"))
            .map(|t| t.amount)
            .sum();
        assert_eq!(buyer_total, 3 + 5);
    }
}
