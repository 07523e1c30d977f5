//! In-memory collaborator implementations for tests.
//!
//! Everything here favours being obviously correct over being fast: the
//! book is a pair of sorted vectors, the ledger a handful of maps. The
//! handles that tests need to inspect after the market takes ownership
//! (the event sink, the ledger) are cheap clones over shared interiors.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use execore_types::{
    CancellationConfirmation, ExecoreError, MarketConfig, MarketEvent, MarketId, Order,
    OrderConfirmation, OrderId, OrderStatus, OrderType, PartyId, RejectReason, Result, Side,
    TimeInForce, Trade, TradeType,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::auction::AuctionState;
use crate::engines::{
    Broker, CollateralLedger, LiquidityMonitor, MarginUpdate, MarketPosition, MatchingBook,
    PositionTracker, PriceMonitor, RiskEngine, RiskFactors, SettlementEngine,
    TargetStakeCalculator, Transfer, TransferKind,
};
use crate::idgen::IdGenerator;
use crate::market::{Market, MarketCollaborators};

// =========================================================================
// Matching book
// =========================================================================

#[derive(Debug, Default, Clone)]
struct BookInner {
    /// (priority, order); buys sorted price desc then priority asc,
    /// sells price asc then priority asc.
    buys: Vec<(u64, Order)>,
    sells: Vec<(u64, Order)>,
    next_priority: u64,
    in_auction: bool,
}

impl BookInner {
    fn resort(&mut self) {
        self.buys
            .sort_by(|(pa, a), (pb, b)| b.price.cmp(&a.price).then(pa.cmp(pb)));
        self.sells
            .sort_by(|(pa, a), (pb, b)| a.price.cmp(&b.price).then(pa.cmp(pb)));
    }

    fn insert(&mut self, order: Order) {
        let priority = self.next_priority;
        self.next_priority += 1;
        match order.side {
            Side::Buy => self.buys.push((priority, order)),
            Side::Sell => self.sells.push((priority, order)),
        }
        self.resort();
    }

    fn take(&mut self, id: OrderId) -> Option<Order> {
        for side in [&mut self.buys, &mut self.sells] {
            if let Some(pos) = side.iter().position(|(_, o)| o.id == id) {
                return Some(side.remove(pos).1);
            }
        }
        None
    }

    fn find(&self, id: OrderId) -> Option<&Order> {
        self.buys
            .iter()
            .chain(self.sells.iter())
            .map(|(_, o)| o)
            .find(|o| o.id == id)
    }

    fn crosses(aggressor: &Order, passive: &Order) -> bool {
        match aggressor.order_type {
            OrderType::Limit => match aggressor.side {
                Side::Buy => aggressor.price >= passive.price,
                Side::Sell => aggressor.price <= passive.price,
            },
            // Market and network orders cross at any price.
            OrderType::Market | OrderType::Network => true,
        }
    }

    fn available_fill(&self, order: &Order) -> u64 {
        let opposite = match order.side {
            Side::Buy => &self.sells,
            Side::Sell => &self.buys,
        };
        let mut fill = 0u64;
        for (_, passive) in opposite {
            if !Self::crosses(order, passive) {
                break;
            }
            if passive.party == order.party {
                break;
            }
            fill += passive.remaining;
            if fill >= order.remaining {
                break;
            }
        }
        fill.min(order.remaining)
    }

    fn match_order(&mut self, order: &mut Order) -> (Vec<Trade>, Vec<Order>) {
        let mut trades = Vec::new();
        let mut affected = Vec::new();
        let mut fill_index = 0u64;
        while order.remaining > 0 {
            let opposite = match order.side {
                Side::Buy => &mut self.sells,
                Side::Sell => &mut self.buys,
            };
            let Some((_, passive)) = opposite.first_mut() else {
                break;
            };
            if !Self::crosses(order, passive) {
                break;
            }
            if passive.party == order.party {
                order.status = OrderStatus::Stopped;
                order.reason = Some(RejectReason::SelfTrading);
                break;
            }
            let size = order.remaining.min(passive.remaining);
            let price = passive.price;
            let (buyer, seller, buy_order, sell_order) = match order.side {
                Side::Buy => (
                    order.party.clone(),
                    passive.party.clone(),
                    order.id,
                    passive.id,
                ),
                Side::Sell => (
                    passive.party.clone(),
                    order.party.clone(),
                    passive.id,
                    order.id,
                ),
            };
            trades.push(Trade {
                id: IdGenerator::trade_id(order.id, fill_index),
                market: order.market,
                price,
                size,
                buyer,
                seller,
                aggressor: order.side,
                buy_order,
                sell_order,
                timestamp: order.updated_at,
                trade_type: TradeType::Default,
                buyer_fee: execore_types::Fee::default(),
                seller_fee: execore_types::Fee::default(),
            });
            order.remaining -= size;
            passive.remaining -= size;
            passive.updated_at = order.updated_at;
            if passive.remaining == 0 {
                passive.status = OrderStatus::Filled;
                affected.push(passive.clone());
                opposite.remove(0);
            } else {
                passive.status = OrderStatus::PartiallyFilled;
                affected.push(passive.clone());
            }
            fill_index += 1;
        }
        (trades, affected)
    }

    /// Crossing volume and the midpoint price of the first crossing pair.
    fn indicative(&self) -> (u64, u64) {
        let mut probe = self.clone();
        let (price, trades, _) = probe.uncross(0);
        (price, trades.iter().map(|t| t.size).sum())
    }

    /// Uncrosses in place at the midpoint of the first crossing pair.
    /// Returns the uncross price, the trades, and the orders that were
    /// fully filled and removed.
    fn uncross(&mut self, now: i64) -> (u64, Vec<Trade>, Vec<Order>) {
        let price = match (self.buys.first(), self.sells.first()) {
            (Some((_, b)), Some((_, s))) if b.price >= s.price => {
                u64::midpoint(b.price, s.price)
            }
            _ => return (0, Vec::new(), Vec::new()),
        };
        let mut trades = Vec::new();
        let mut filled = Vec::new();
        let mut fill_index = 0u64;
        loop {
            let crossing = matches!(
                (self.buys.first(), self.sells.first()),
                (Some((_, b)), Some((_, s))) if b.price >= s.price
            );
            if !crossing {
                break;
            }
            let (buy_done, sell_done) = {
                let buy = &mut self.buys[0].1;
                let sell = &mut self.sells[0].1;
                let size = buy.remaining.min(sell.remaining);
                trades.push(Trade {
                    id: IdGenerator::trade_id(buy.id, fill_index),
                    market: buy.market,
                    price,
                    size,
                    buyer: buy.party.clone(),
                    seller: sell.party.clone(),
                    aggressor: Side::Buy,
                    buy_order: buy.id,
                    sell_order: sell.id,
                    timestamp: now,
                    trade_type: TradeType::Default,
                    buyer_fee: execore_types::Fee::default(),
                    seller_fee: execore_types::Fee::default(),
                });
                buy.remaining -= size;
                sell.remaining -= size;
                buy.updated_at = now;
                sell.updated_at = now;
                (buy.remaining == 0, sell.remaining == 0)
            };
            if buy_done {
                let (_, mut order) = self.buys.remove(0);
                order.status = OrderStatus::Filled;
                filled.push(order);
            } else {
                self.buys[0].1.status = OrderStatus::PartiallyFilled;
            }
            if sell_done {
                let (_, mut order) = self.sells.remove(0);
                order.status = OrderStatus::Filled;
                filled.push(order);
            } else {
                self.sells[0].1.status = OrderStatus::PartiallyFilled;
            }
            fill_index += 1;
        }
        (price, trades, filled)
    }

    fn best_static(&self, side: Side) -> Option<(u64, u64)> {
        let orders = match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        };
        let best = orders.iter().map(|(_, o)| o).find(|o| o.pegged.is_none())?;
        let volume = orders
            .iter()
            .map(|(_, o)| o)
            .filter(|o| o.pegged.is_none() && o.price == best.price)
            .map(|o| o.remaining)
            .sum();
        Some((best.price, volume))
    }
}

/// Price-time-priority book for tests.
#[derive(Debug, Default)]
pub struct TestBook {
    inner: BookInner,
}

impl TestBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchingBook for TestBook {
    fn submit_order(&mut self, order: &mut Order) -> Result<OrderConfirmation> {
        if self.inner.in_auction {
            // No matching during an auction; everything rests.
            self.inner.insert(order.clone());
            return Ok(OrderConfirmation::from_order(order.clone()));
        }
        if order.time_in_force == TimeInForce::Fok
            && self.inner.available_fill(order) < order.remaining
        {
            order.status = OrderStatus::Stopped;
            order.reason = Some(RejectReason::FokNotFilled);
            return Ok(OrderConfirmation::from_order(order.clone()));
        }
        let (trades, passive_orders_affected) = self.inner.match_order(order);
        if order.remaining == 0 {
            order.status = OrderStatus::Filled;
        } else if order.status == OrderStatus::Active {
            if order.time_in_force.is_persistent() || order.time_in_force == TimeInForce::Gfn {
                if !trades.is_empty() {
                    order.status = OrderStatus::PartiallyFilled;
                }
                self.inner.insert(order.clone());
            } else {
                order.status = OrderStatus::Stopped;
            }
        }
        Ok(OrderConfirmation {
            order: Some(order.clone()),
            trades,
            passive_orders_affected,
        })
    }

    fn cancel_order(&mut self, id: OrderId) -> Result<CancellationConfirmation> {
        let order = self
            .inner
            .take(id)
            .ok_or(ExecoreError::OrderNotFound(id))?;
        Ok(CancellationConfirmation { order })
    }

    fn amend_order(&mut self, amended: &Order) -> Result<()> {
        let slot = self
            .inner
            .buys
            .iter_mut()
            .chain(self.inner.sells.iter_mut())
            .find(|(_, o)| o.id == amended.id)
            .ok_or(ExecoreError::OrderNotFound(amended.id))?;
        slot.1 = amended.clone();
        self.inner.resort();
        Ok(())
    }

    fn order_by_id(&self, id: OrderId) -> Result<Order> {
        self.inner
            .find(id)
            .cloned()
            .ok_or(ExecoreError::OrderNotFound(id))
    }

    fn orders_for_party(&self, party: &PartyId) -> Vec<Order> {
        self.inner
            .buys
            .iter()
            .chain(self.inner.sells.iter())
            .map(|(_, o)| o)
            .filter(|o| o.party == *party)
            .cloned()
            .collect()
    }

    fn get_trades(&self, order: &Order) -> Result<Vec<Trade>> {
        if self.inner.in_auction {
            return Ok(Vec::new());
        }
        let mut probe = self.inner.clone();
        let mut dry = order.clone();
        if dry.time_in_force == TimeInForce::Fok && probe.available_fill(&dry) < dry.remaining {
            return Ok(Vec::new());
        }
        let (trades, _) = probe.match_order(&mut dry);
        Ok(trades)
    }

    fn enter_auction(&mut self) -> Vec<Order> {
        self.inner.in_auction = true;
        let mut invalidated = Vec::new();
        for side in [&mut self.inner.buys, &mut self.inner.sells] {
            let mut kept = Vec::with_capacity(side.len());
            for entry in side.drain(..) {
                if entry.1.time_in_force == TimeInForce::Gfn {
                    invalidated.push(entry.1);
                } else {
                    kept.push(entry);
                }
            }
            *side = kept;
        }
        invalidated
    }

    fn leave_auction(&mut self, now: i64) -> Result<(Vec<OrderConfirmation>, Vec<Order>)> {
        let (_, trades, filled) = self.inner.uncross(now);
        let mut affected = filled;
        for side in [&mut self.inner.buys, &mut self.inner.sells] {
            for (_, order) in side.iter() {
                if order.status == OrderStatus::PartiallyFilled {
                    affected.push(order.clone());
                }
            }
        }
        let confirmations = if trades.is_empty() {
            Vec::new()
        } else {
            vec![OrderConfirmation {
                order: None,
                trades,
                passive_orders_affected: affected,
            }]
        };
        // GFA orders cannot survive into continuous trading.
        let mut to_cancel = Vec::new();
        for side in [&mut self.inner.buys, &mut self.inner.sells] {
            let mut kept = Vec::with_capacity(side.len());
            for entry in side.drain(..) {
                if entry.1.time_in_force == TimeInForce::Gfa {
                    to_cancel.push(entry.1);
                } else {
                    kept.push(entry);
                }
            }
            *side = kept;
        }
        self.inner.in_auction = false;
        Ok((confirmations, to_cancel))
    }

    fn best_static_bid_price_and_volume(&self) -> Option<(u64, u64)> {
        self.inner.best_static(Side::Buy)
    }

    fn best_static_offer_price_and_volume(&self) -> Option<(u64, u64)> {
        self.inner.best_static(Side::Sell)
    }

    fn indicative_price_and_volume(&self) -> (u64, u64) {
        self.inner.indicative()
    }

    fn remove_distressed_orders(&mut self, parties: &[PartyId]) -> Result<Vec<Order>> {
        let mut removed = Vec::new();
        for side in [&mut self.inner.buys, &mut self.inner.sells] {
            let mut kept = Vec::with_capacity(side.len());
            for entry in side.drain(..) {
                if parties.contains(&entry.1.party) {
                    removed.push(entry.1);
                } else {
                    kept.push(entry);
                }
            }
            *side = kept;
        }
        Ok(removed)
    }

    fn state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(if self.inner.in_auction { [1u8] } else { [0u8] });
        for (_, order) in self.inner.buys.iter().chain(self.inner.sells.iter()) {
            hasher.update(order.id.0.as_bytes());
            hasher.update(order.price.to_le_bytes());
            hasher.update(order.remaining.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

// =========================================================================
// Collateral ledger
// =========================================================================

#[derive(Debug, Default)]
struct LedgerInner {
    general: BTreeMap<PartyId, u64>,
    margin: BTreeMap<PartyId, u64>,
    bond: BTreeMap<PartyId, u64>,
    insurance: u64,
    settlement_pool: u64,
    maker_fee_pool: u64,
    infra_fee_pool: u64,
    liquidity_fee_pool: u64,
}

/// Map-backed ledger; clones share state so tests can deposit into and
/// inspect the ledger the market owns.
#[derive(Debug, Clone, Default)]
pub struct TestLedger {
    inner: Rc<RefCell<LedgerInner>>,
}

impl TestLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, party: &PartyId, amount: u64) {
        *self
            .inner
            .borrow_mut()
            .general
            .entry(party.clone())
            .or_insert(0) += amount;
    }

    #[must_use]
    pub fn general_balance(&self, party: &PartyId) -> u64 {
        self.inner.borrow().general.get(party).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn margin_balance(&self, party: &PartyId) -> u64 {
        self.inner.borrow().margin.get(party).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn bond_balance(&self, party: &PartyId) -> u64 {
        self.inner.borrow().bond.get(party).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn insurance_balance(&self) -> u64 {
        self.inner.borrow().insurance
    }

    #[must_use]
    pub fn liquidity_fee_pool(&self) -> u64 {
        self.inner.borrow().liquidity_fee_pool
    }
}

impl CollateralLedger for TestLedger {
    fn has_general_account(&self, party: &PartyId, _asset: &str) -> bool {
        self.inner.borrow().general.contains_key(party)
    }

    fn ensure_margin_account(
        &mut self,
        _market: &MarketId,
        party: &PartyId,
        _asset: &str,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .margin
            .entry(party.clone())
            .or_insert(0);
        Ok(())
    }

    fn ensure_bond_account(
        &mut self,
        _market: &MarketId,
        party: &PartyId,
        _asset: &str,
    ) -> Result<u64> {
        Ok(*self
            .inner
            .borrow_mut()
            .bond
            .entry(party.clone())
            .or_insert(0))
    }

    fn margin_update(
        &mut self,
        _market: &MarketId,
        transfer: &Transfer,
        _asset: &str,
    ) -> Result<Transfer> {
        let mut inner = self.inner.borrow_mut();
        match transfer.kind {
            TransferKind::MarginLow => {
                let general = inner.general.entry(transfer.party.clone()).or_insert(0);
                if *general < transfer.amount {
                    return Err(ExecoreError::TransferFailed {
                        reason: format!(
                            "general balance {} below required {}",
                            general, transfer.amount
                        ),
                    });
                }
                *general -= transfer.amount;
                *inner.margin.entry(transfer.party.clone()).or_insert(0) += transfer.amount;
                Ok(transfer.clone())
            }
            TransferKind::MarginHigh => {
                let margin = inner.margin.entry(transfer.party.clone()).or_insert(0);
                let amount = transfer.amount.min(*margin);
                *margin -= amount;
                *inner.general.entry(transfer.party.clone()).or_insert(0) += amount;
                Ok(Transfer {
                    amount,
                    ..transfer.clone()
                })
            }
            _ => Err(ExecoreError::TransferFailed {
                reason: format!("unexpected margin transfer kind {:?}", transfer.kind),
            }),
        }
    }

    fn mark_to_market(
        &mut self,
        _market: &MarketId,
        transfers: &[Transfer],
        _asset: &str,
    ) -> Result<Vec<Transfer>> {
        let mut inner = self.inner.borrow_mut();
        let mut applied = Vec::with_capacity(transfers.len());
        // Losses feed the pool first; insurance covers shortfalls.
        for transfer in transfers
            .iter()
            .filter(|t| t.kind == TransferKind::MtmLoss)
        {
            let margin = inner.margin.entry(transfer.party.clone()).or_insert(0);
            let from_margin = transfer.amount.min(*margin);
            *margin -= from_margin;
            let shortfall = transfer.amount - from_margin;
            let from_insurance = shortfall.min(inner.insurance);
            inner.insurance -= from_insurance;
            inner.settlement_pool += from_margin + from_insurance;
            applied.push(Transfer {
                amount: from_margin + from_insurance,
                ..transfer.clone()
            });
        }
        for transfer in transfers.iter().filter(|t| t.kind == TransferKind::MtmWin) {
            let amount = transfer.amount.min(inner.settlement_pool);
            inner.settlement_pool -= amount;
            *inner.margin.entry(transfer.party.clone()).or_insert(0) += amount;
            applied.push(Transfer {
                amount,
                ..transfer.clone()
            });
        }
        Ok(applied)
    }

    fn bond_update(
        &mut self,
        _market: &MarketId,
        transfer: &Transfer,
        _asset: &str,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match transfer.kind {
            TransferKind::BondLow => {
                let general = inner.general.entry(transfer.party.clone()).or_insert(0);
                if *general < transfer.amount {
                    return Err(ExecoreError::TransferFailed {
                        reason: format!(
                            "insufficient general balance to fund bond of {}",
                            transfer.amount
                        ),
                    });
                }
                *general -= transfer.amount;
                *inner.bond.entry(transfer.party.clone()).or_insert(0) += transfer.amount;
            }
            TransferKind::BondHigh => {
                let bond = inner.bond.entry(transfer.party.clone()).or_insert(0);
                let amount = transfer.amount.min(*bond);
                *bond -= amount;
                *inner.general.entry(transfer.party.clone()).or_insert(0) += amount;
            }
            TransferKind::BondSlashing => {
                let bond = inner.bond.entry(transfer.party.clone()).or_insert(0);
                let amount = transfer.amount.min(*bond);
                *bond -= amount;
                inner.insurance += amount;
            }
            _ => {
                return Err(ExecoreError::TransferFailed {
                    reason: format!("unexpected bond transfer kind {:?}", transfer.kind),
                })
            }
        }
        Ok(())
    }

    fn transfer_fees(
        &mut self,
        _market: &MarketId,
        _asset: &str,
        fees: &[Transfer],
    ) -> Result<Vec<Transfer>> {
        let mut inner = self.inner.borrow_mut();
        let mut applied = Vec::with_capacity(fees.len());
        for transfer in fees {
            match transfer.kind {
                TransferKind::MakerFeePay
                | TransferKind::InfrastructureFeePay
                | TransferKind::LiquidityFeePay => {
                    let general = inner.general.entry(transfer.party.clone()).or_insert(0);
                    let amount = transfer.amount.min(*general);
                    *general -= amount;
                    match transfer.kind {
                        TransferKind::MakerFeePay => inner.maker_fee_pool += amount,
                        TransferKind::InfrastructureFeePay => inner.infra_fee_pool += amount,
                        _ => inner.liquidity_fee_pool += amount,
                    }
                    applied.push(Transfer {
                        amount,
                        ..transfer.clone()
                    });
                }
                TransferKind::MakerFeeReceive => {
                    let amount = transfer.amount.min(inner.maker_fee_pool);
                    inner.maker_fee_pool -= amount;
                    *inner.general.entry(transfer.party.clone()).or_insert(0) += amount;
                    applied.push(Transfer {
                        amount,
                        ..transfer.clone()
                    });
                }
                TransferKind::LiquidityFeeDistribute => {
                    let amount = transfer.amount.min(inner.liquidity_fee_pool);
                    inner.liquidity_fee_pool -= amount;
                    *inner.general.entry(transfer.party.clone()).or_insert(0) += amount;
                    applied.push(Transfer {
                        amount,
                        ..transfer.clone()
                    });
                }
                _ => {
                    return Err(ExecoreError::TransferFailed {
                        reason: format!("unexpected fee transfer kind {:?}", transfer.kind),
                    })
                }
            }
        }
        Ok(applied)
    }

    fn liquidity_fee_balance(&self, _market: &MarketId, _asset: &str) -> u64 {
        self.inner.borrow().liquidity_fee_pool
    }

    fn clear_party(&mut self, _market: &MarketId, party: &PartyId, _asset: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let margin = inner.margin.remove(party).unwrap_or(0);
        let bond = inner.bond.remove(party).unwrap_or(0);
        inner.insurance += margin + bond;
        Ok(())
    }

    fn margin_and_general_balance(
        &self,
        _market: &MarketId,
        party: &PartyId,
        _asset: &str,
    ) -> (u64, u64) {
        let inner = self.inner.borrow();
        (
            inner.margin.get(party).copied().unwrap_or(0),
            inner.general.get(party).copied().unwrap_or(0),
        )
    }
}

// =========================================================================
// Risk
// =========================================================================

/// Flat-factor margin model: required margin is `exposure * price * factor`.
#[derive(Debug, Clone)]
pub struct TestRisk {
    factor: Decimal,
}

impl TestRisk {
    #[must_use]
    pub fn new(factor: Decimal) -> Self {
        Self { factor }
    }

    fn required(&self, exposure: u64, price: u64) -> u64 {
        (Decimal::from(exposure) * Decimal::from(price) * self.factor)
            .ceil()
            .to_u64()
            .unwrap_or(u64::MAX)
    }
}

impl Default for TestRisk {
    fn default() -> Self {
        Self::new(Decimal::new(1, 1)) // 0.1
    }
}

impl RiskEngine for TestRisk {
    fn check_margin(
        &self,
        position: &MarketPosition,
        order: &Order,
        mark_price: u64,
    ) -> Result<Option<Transfer>> {
        let price = if mark_price > 0 { mark_price } else { order.price };
        if price == 0 {
            return Ok(None);
        }
        let required = self.required(order.remaining, price);
        if required == 0 {
            return Ok(None);
        }
        Ok(Some(Transfer {
            party: position.party.clone(),
            kind: TransferKind::MarginLow,
            amount: required,
        }))
    }

    fn update_margins(
        &self,
        positions: &[MarketPosition],
        mark_price: u64,
        margin_balances: &dyn Fn(&PartyId) -> (u64, u64),
    ) -> Vec<MarginUpdate> {
        let mut updates = Vec::new();
        for position in positions {
            let required = self.required(position.size.unsigned_abs(), mark_price);
            let (margin, general) = margin_balances(&position.party);
            if margin >= required {
                continue;
            }
            let shortfall = required - margin;
            if general >= shortfall {
                updates.push(MarginUpdate {
                    party: position.party.clone(),
                    transfer: Some(Transfer {
                        party: position.party.clone(),
                        kind: TransferKind::MarginLow,
                        amount: shortfall,
                    }),
                    closed: false,
                    bond_penalty: None,
                });
            } else {
                updates.push(MarginUpdate {
                    party: position.party.clone(),
                    transfer: None,
                    closed: true,
                    bond_penalty: None,
                });
            }
        }
        updates
    }

    fn expect_margins(
        &self,
        positions: &[MarketPosition],
        mark_price: u64,
        margin_balances: &dyn Fn(&PartyId) -> (u64, u64),
    ) -> Vec<PartyId> {
        positions
            .iter()
            .filter(|position| {
                let required = self.required(position.size.unsigned_abs(), mark_price);
                let (margin, general) = margin_balances(&position.party);
                margin + general < required
            })
            .map(|p| p.party.clone())
            .collect()
    }

    fn factors(&self) -> RiskFactors {
        RiskFactors {
            long: self.factor,
            short: self.factor,
        }
    }
}

// =========================================================================
// Positions
// =========================================================================

#[derive(Debug, Default)]
pub struct TestPositions {
    positions: BTreeMap<PartyId, MarketPosition>,
}

impl TestPositions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, party: &PartyId) -> &mut MarketPosition {
        self.positions
            .entry(party.clone())
            .or_insert_with(|| MarketPosition {
                party: party.clone(),
                size: 0,
                buy: 0,
                sell: 0,
                price: 0,
            })
    }
}

impl PositionTracker for TestPositions {
    fn register_order(&mut self, order: &Order) {
        let position = self.entry(&order.party);
        match order.side {
            Side::Buy => position.buy += order.remaining,
            Side::Sell => position.sell += order.remaining,
        }
    }

    fn unregister_order(&mut self, order: &Order) {
        let position = self.entry(&order.party);
        match order.side {
            Side::Buy => position.buy = position.buy.saturating_sub(order.remaining),
            Side::Sell => position.sell = position.sell.saturating_sub(order.remaining),
        }
    }

    fn amend_order(&mut self, original: &Order, amended: &Order) {
        self.unregister_order(original);
        self.register_order(amended);
    }

    fn update(&mut self, trade: &Trade) -> Vec<MarketPosition> {
        let size = i64::try_from(trade.size).unwrap_or(i64::MAX);
        let buyer = self.entry(&trade.buyer);
        buyer.size += size;
        buyer.buy = buyer.buy.saturating_sub(trade.size);
        buyer.price = trade.price;
        let buyer = buyer.clone();
        let seller = self.entry(&trade.seller);
        seller.size -= size;
        seller.sell = seller.sell.saturating_sub(trade.size);
        seller.price = trade.price;
        let seller = seller.clone();
        vec![buyer, seller]
    }

    fn positions(&self) -> Vec<MarketPosition> {
        self.positions.values().cloned().collect()
    }

    fn position(&self, party: &PartyId) -> Option<MarketPosition> {
        self.positions.get(party).cloned()
    }

    fn remove_distressed(&mut self, parties: &[PartyId]) {
        for party in parties {
            self.positions.remove(party);
        }
    }

    fn open_interest(&self) -> u64 {
        self.positions
            .values()
            .filter(|p| p.size > 0)
            .map(|p| p.size.unsigned_abs())
            .sum()
    }
}

// =========================================================================
// Settlement
// =========================================================================

#[derive(Debug, Default, Clone)]
struct SettleRecord {
    /// Signed cumulative cost of the open position.
    cost: i64,
    /// Profit already settled through previous MTM runs.
    settled: i64,
}

/// Cost-basis MTM: a party's unrealised profit is `size * mark - cost`;
/// each settlement transfers the delta against what was already settled.
#[derive(Debug, Default)]
pub struct TestSettlement {
    records: BTreeMap<PartyId, SettleRecord>,
}

impl TestSettlement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettlementEngine for TestSettlement {
    fn add_trade(&mut self, trade: &Trade) {
        let value = i64::try_from(trade.price * trade.size).unwrap_or(i64::MAX);
        self.records.entry(trade.buyer.clone()).or_default().cost += value;
        self.records.entry(trade.seller.clone()).or_default().cost -= value;
    }

    fn settle_mtm(&mut self, mark_price: u64, positions: &[MarketPosition]) -> Vec<Transfer> {
        let mark = i64::try_from(mark_price).unwrap_or(i64::MAX);
        let mut losses = Vec::new();
        let mut wins = Vec::new();
        for position in positions {
            let record = self.records.entry(position.party.clone()).or_default();
            let pnl = position.size * mark - record.cost;
            let delta = pnl - record.settled;
            record.settled = pnl;
            match delta.cmp(&0) {
                std::cmp::Ordering::Less => losses.push(Transfer {
                    party: position.party.clone(),
                    kind: TransferKind::MtmLoss,
                    amount: delta.unsigned_abs(),
                }),
                std::cmp::Ordering::Greater => wins.push(Transfer {
                    party: position.party.clone(),
                    kind: TransferKind::MtmWin,
                    amount: delta.unsigned_abs(),
                }),
                std::cmp::Ordering::Equal => {}
            }
        }
        losses.extend(wins);
        losses
    }

    fn remove_distressed(&mut self, parties: &[PartyId]) {
        for party in parties {
            self.records.remove(party);
        }
    }
}

// =========================================================================
// Monitors
// =========================================================================

/// Fixed-band price monitor. With no bounds set every price passes.
#[derive(Debug, Default)]
pub struct TestPriceMonitor {
    bounds: Option<(u64, u64)>,
    auction_duration: i64,
}

impl TestPriceMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bounds(min: u64, max: u64, auction_duration: i64) -> Self {
        Self {
            bounds: Some((min, max)),
            auction_duration,
        }
    }
}

impl PriceMonitor for TestPriceMonitor {
    fn check_price(
        &mut self,
        auction: &mut AuctionState,
        now: i64,
        price: u64,
        _volume: u64,
        persistent: bool,
    ) -> Result<()> {
        let Some((min, max)) = self.bounds else {
            return Ok(());
        };
        if price >= min && price <= max {
            return Ok(());
        }
        if !persistent {
            return Err(ExecoreError::InvalidOrder {
                reason: format!("price {price} outside monitoring bounds [{min}, {max}]"),
            });
        }
        if auction.in_auction() {
            auction.extend_auction(
                execore_types::AuctionTrigger::Price,
                Some(now + self.auction_duration),
            );
        } else {
            auction.start_price_auction(now, Some(now + self.auction_duration));
        }
        Ok(())
    }

    fn on_time_update(&mut self, _now: i64) {}

    fn bounds(&self) -> Vec<(u64, u64)> {
        self.bounds.into_iter().collect()
    }
}

/// Stake-ratio liquidity monitor. With a zero ratio it never triggers.
#[derive(Debug)]
pub struct TestLiquidityMonitor {
    triggering_ratio: Decimal,
    auction_duration: i64,
}

impl TestLiquidityMonitor {
    #[must_use]
    pub fn new(triggering_ratio: Decimal, auction_duration: i64) -> Self {
        Self {
            triggering_ratio,
            auction_duration,
        }
    }
}

impl Default for TestLiquidityMonitor {
    fn default() -> Self {
        Self::new(Decimal::ZERO, 1_000_000_000)
    }
}

impl LiquidityMonitor for TestLiquidityMonitor {
    fn check_liquidity(
        &mut self,
        auction: &mut AuctionState,
        now: i64,
        supplied_stake: Decimal,
        target_stake: Decimal,
        _indicative_uncross: (u64, u64),
        best_static_bid: Option<(u64, u64)>,
        best_static_offer: Option<(u64, u64)>,
    ) {
        if auction.in_auction() {
            if auction.is_liquidity_auction()
                && supplied_stake >= target_stake
                && best_static_bid.is_some()
                && best_static_offer.is_some()
            {
                auction.set_ready_to_leave();
            }
            return;
        }
        if target_stake > Decimal::ZERO && supplied_stake < target_stake * self.triggering_ratio {
            auction.start_liquidity_auction(now, Some(now + self.auction_duration));
        }
    }
}

/// Target stake from the running open-interest maximum.
#[derive(Debug)]
pub struct TestTargetStake {
    scaling: Decimal,
    max_open_interest: u64,
}

impl TestTargetStake {
    #[must_use]
    pub fn new(scaling: Decimal) -> Self {
        Self {
            scaling,
            max_open_interest: 0,
        }
    }
}

impl Default for TestTargetStake {
    fn default() -> Self {
        Self::new(Decimal::ONE)
    }
}

impl TargetStakeCalculator for TestTargetStake {
    fn update_open_interest(&mut self, _now: i64, open_interest: u64) {
        self.max_open_interest = self.max_open_interest.max(open_interest);
    }

    fn target_stake(&mut self, _now: i64, mark_price: u64, factors: RiskFactors) -> Decimal {
        Decimal::from(self.max_open_interest)
            * Decimal::from(mark_price)
            * factors.long.max(factors.short)
            * self.scaling
    }
}

// =========================================================================
// Broker
// =========================================================================

/// Shared handle over the event stream collected by [`VecBroker`].
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    events: Rc<RefCell<Vec<MarketEvent>>>,
}

impl EventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<MarketEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Orders from the stream, in emission order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                MarketEvent::OrderUpdate(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    /// Trades from the stream, in emission order.
    #[must_use]
    pub fn trades(&self) -> Vec<Trade> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                MarketEvent::TradeRecorded(trade) => Some(trade.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct VecBroker {
    sink: EventSink,
}

impl VecBroker {
    #[must_use]
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl Broker for VecBroker {
    fn send(&mut self, event: MarketEvent) {
        tracing::trace!(kind = event.kind(), "event recorded");
        self.sink.events.borrow_mut().push(event);
    }
}

// =========================================================================
// Harness
// =========================================================================

/// A market wired to in-memory collaborators, with the shared handles a
/// test needs to set up accounts and assert on outputs.
pub struct TestMarket {
    pub market: Market,
    pub ledger: TestLedger,
    pub events: EventSink,
}

/// Builds a market over the default test engines.
#[must_use]
pub fn test_market(config: MarketConfig, now: i64) -> TestMarket {
    test_market_with(config, now, TestPriceMonitor::new(), TestLiquidityMonitor::default())
}

/// Same as [`test_market`] but with caller-supplied monitors.
#[must_use]
pub fn test_market_with(
    config: MarketConfig,
    now: i64,
    price_monitor: TestPriceMonitor,
    liquidity_monitor: TestLiquidityMonitor,
) -> TestMarket {
    let ledger = TestLedger::new();
    let events = EventSink::new();
    let engines = MarketCollaborators {
        book: Box::new(TestBook::new()),
        collateral: Box::new(ledger.clone()),
        risk: Box::new(TestRisk::default()),
        positions: Box::new(TestPositions::new()),
        settlement: Box::new(TestSettlement::new()),
        price_monitor: Box::new(price_monitor),
        liquidity_monitor: Box::new(liquidity_monitor),
        target_stake: Box::new(TestTargetStake::default()),
        broker: Box::new(VecBroker::new(events.clone())),
    };
    TestMarket {
        market: Market::new(config, engines, now),
        ledger,
        events,
    }
}
