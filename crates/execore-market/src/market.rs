//! The market orchestrator.
//!
//! One instance per market, externally synchronised: every command —
//! order submission, amendment, cancellation, liquidity commitment, time
//! tick — runs to completion under the caller's lock before the next one
//! starts. The orchestrator coordinates the matching book, the collateral
//! ledger, risk, positions, settlement, and the monitors; it owns the
//! auction state machine, pegged/expiring registries, equity shares, and
//! the fee window.
//!
//! Determinism rules: no wall clock (time arrives in commands), no RNG,
//! IDs minted from a per-command [`IdGenerator`], all registries iterated
//! in a fixed order. Any step that would leave the book and our indices
//! disagreeing aborts the process instead of continuing with divergent
//! state.

use std::collections::BTreeSet;

use execore_types::{
    AuctionTrigger, CancellationConfirmation, ExecoreError, Fee, LiquidityProviderFeeShare,
    LiquidityProvisionStatus, LiquidityProvisionSubmission, MarketConfig, MarketData, MarketEvent,
    MarketState, Order,
    OrderAmendment, OrderConfirmation, OrderId, OrderStatus, OrderType, PartyId, Result, Side,
    TimeInForce, Trade, TradeType, TradingMode, INITIAL_ORDER_VERSION,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::auction::AuctionState;
use crate::engines::{
    Broker, CollateralLedger, LiquidityMonitor, MarketPosition, MatchingBook, PositionTracker,
    PriceMonitor, RiskEngine, SettlementEngine, TargetStakeCalculator, Transfer, TransferKind,
};
use crate::equity_shares::EquityShares;
use crate::expiring_orders::ExpiringOrders;
use crate::fee_splitter::FeeSplitter;
use crate::fees::FeeEngine;
use crate::idgen::IdGenerator;
use crate::liquidity::{provision_orders, LiquidityEngine};
use crate::pegged_orders::PeggedOrders;
use crate::repricing::{price_for_peg, static_mid_price_buy, static_mid_price_sell, validate_peg};

/// The external engines a market coordinates.
pub struct MarketCollaborators {
    pub book: Box<dyn MatchingBook>,
    pub collateral: Box<dyn CollateralLedger>,
    pub risk: Box<dyn RiskEngine>,
    pub positions: Box<dyn PositionTracker>,
    pub settlement: Box<dyn SettlementEngine>,
    pub price_monitor: Box<dyn PriceMonitor>,
    pub liquidity_monitor: Box<dyn LiquidityMonitor>,
    pub target_stake: Box<dyn TargetStakeCalculator>,
    pub broker: Box<dyn Broker>,
}

/// Borrowed view of the scalar state captured into a snapshot.
pub(crate) struct SnapshotExtra<'a> {
    pub pegged_live: &'a BTreeSet<OrderId>,
    pub mark_price: u64,
    pub liquidity_fee: Decimal,
    pub last_mvp: Decimal,
    pub last_target_stake: Decimal,
    pub next_mtm: i64,
    pub last_fee_distribution: i64,
    pub current_time: i64,
}

/// Owned state handed back to a market on restore.
pub(crate) struct RestoredComponents {
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
    pub last_mvp: Decimal,
    pub last_target_stake: Decimal,
    pub next_mtm: i64,
    pub last_fee_distribution: i64,
    pub current_time: i64,
}

pub struct Market {
    config: MarketConfig,
    state: MarketState,
    auction: AuctionState,

    book: Box<dyn MatchingBook>,
    collateral: Box<dyn CollateralLedger>,
    risk: Box<dyn RiskEngine>,
    positions: Box<dyn PositionTracker>,
    settlement: Box<dyn SettlementEngine>,
    price_monitor: Box<dyn PriceMonitor>,
    liquidity_monitor: Box<dyn LiquidityMonitor>,
    target_stake: Box<dyn TargetStakeCalculator>,
    broker: Box<dyn Broker>,

    fee_engine: FeeEngine,
    equity_shares: EquityShares,
    fee_splitter: FeeSplitter,
    pegged: PeggedOrders,
    expiring: ExpiringOrders,
    liquidity: LiquidityEngine,
    /// Pegged orders currently live on the book (parked ones live in
    /// `pegged` instead).
    pegged_live: BTreeSet<OrderId>,

    mark_price: u64,
    last_mvp: Decimal,
    last_target_stake: Decimal,
    next_mtm: i64,
    last_fee_distribution: i64,
    current_time: i64,
}

impl Market {
    #[must_use]
    pub fn new(config: MarketConfig, engines: MarketCollaborators, now: i64) -> Self {
        let auction = AuctionState::opening(now, config.opening_auction_duration);
        let fee_engine = FeeEngine::new(config.fees.clone());
        let mut fee_splitter = FeeSplitter::new();
        fee_splitter.time_window_start(now);
        Self {
            state: MarketState::Proposed,
            auction,
            book: engines.book,
            collateral: engines.collateral,
            risk: engines.risk,
            positions: engines.positions,
            settlement: engines.settlement,
            price_monitor: engines.price_monitor,
            liquidity_monitor: engines.liquidity_monitor,
            target_stake: engines.target_stake,
            broker: engines.broker,
            fee_engine,
            equity_shares: EquityShares::new(Decimal::ZERO),
            fee_splitter,
            pegged: PeggedOrders::new(),
            expiring: ExpiringOrders::new(),
            liquidity: LiquidityEngine::new(),
            pegged_live: BTreeSet::new(),
            mark_price: 0,
            last_mvp: Decimal::ZERO,
            last_target_stake: Decimal::ZERO,
            next_mtm: now + config.mark_to_market_interval,
            last_fee_distribution: now,
            current_time: now,
            config,
        }
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    #[must_use]
    pub fn id(&self) -> execore_types::MarketId {
        self.config.id
    }

    #[must_use]
    pub fn state(&self) -> MarketState {
        self.state
    }

    #[must_use]
    pub fn trading_mode(&self) -> TradingMode {
        if self.closed() {
            TradingMode::NoTrading
        } else {
            self.auction.mode()
        }
    }

    #[must_use]
    pub fn mark_price(&self) -> u64 {
        self.mark_price
    }

    #[must_use]
    pub fn liquidity_fee(&self) -> Decimal {
        self.fee_engine.liquidity_fee()
    }

    fn closed(&self) -> bool {
        matches!(
            self.state,
            MarketState::TradingTerminated
                | MarketState::Settled
                | MarketState::Cancelled
                | MarketState::Rejected
        )
    }

    /// Derived market figures, assembled on demand.
    #[must_use]
    pub fn market_data(&self) -> MarketData {
        let bid = self.book.best_static_bid_price_and_volume();
        let ask = self.book.best_static_offer_price_and_volume();
        let (mid_buy, mid_sell) = match (bid, ask) {
            (Some((b, _)), Some((a, _))) => {
                (static_mid_price_buy(b, a), static_mid_price_sell(b, a))
            }
            _ => (0, 0),
        };
        let (indicative_price, indicative_volume) = if self.auction.in_auction() {
            self.book.indicative_price_and_volume()
        } else {
            (0, 0)
        };
        MarketData {
            mark_price: self.mark_price,
            best_bid_price: bid.map_or(0, |(p, _)| p),
            best_bid_volume: bid.map_or(0, |(_, v)| v),
            best_offer_price: ask.map_or(0, |(p, _)| p),
            best_offer_volume: ask.map_or(0, |(_, v)| v),
            mid_price_buy: mid_buy,
            mid_price_sell: mid_sell,
            indicative_price,
            indicative_volume,
            open_interest: self.positions.open_interest(),
            market_state: Some(self.state),
            trading_mode: Some(self.trading_mode()),
            auction_trigger: self.auction.trigger(),
            auction_start: self.auction.begin().unwrap_or(0),
            auction_end: self.auction.expires_at().unwrap_or(0),
            target_stake: self.last_target_stake,
            supplied_stake: self.liquidity.total_stake(),
            market_value_proxy: self.last_mvp,
            liquidity_provider_fee_shares: self
                .equity_shares
                .all_shares()
                .into_iter()
                .map(|(party, share)| LiquidityProviderFeeShare {
                    average_entry_valuation: self.equity_shares.avg_entry_valuation(&party),
                    party,
                    equity_like_share: share,
                })
                .collect(),
        }
    }

    /// Content hash of the market's deterministic state, book included.
    #[must_use]
    pub fn state_hash(&self) -> [u8; 32] {
        crate::snapshot::market_state_hash(self)
    }

    pub(crate) fn components(
        &self,
    ) -> (
        &MarketConfig,
        MarketState,
        &AuctionState,
        &EquityShares,
        &FeeSplitter,
        &PeggedOrders,
        &ExpiringOrders,
        &LiquidityEngine,
    ) {
        (
            &self.config,
            self.state,
            &self.auction,
            &self.equity_shares,
            &self.fee_splitter,
            &self.pegged,
            &self.expiring,
            &self.liquidity,
        )
    }

    pub(crate) fn snapshot_extra(&self) -> SnapshotExtra<'_> {
        SnapshotExtra {
            pegged_live: &self.pegged_live,
            mark_price: self.mark_price,
            liquidity_fee: self.fee_engine.liquidity_fee(),
            last_mvp: self.last_mvp,
            last_target_stake: self.last_target_stake,
            next_mtm: self.next_mtm,
            last_fee_distribution: self.last_fee_distribution,
            current_time: self.current_time,
        }
    }

    pub(crate) fn book_hash(&self) -> [u8; 32] {
        self.book.state_hash()
    }

    pub(crate) fn restore_components(&mut self, restored: RestoredComponents) {
        self.state = restored.state;
        self.auction = restored.auction;
        self.equity_shares = restored.equity_shares;
        self.fee_splitter = restored.fee_splitter;
        self.pegged = restored.pegged;
        self.expiring = restored.expiring;
        self.liquidity = restored.liquidity;
        self.pegged_live = restored.pegged_live;
        self.mark_price = restored.mark_price;
        self.last_mvp = restored.last_mvp;
        self.last_target_stake = restored.last_target_stake;
        self.next_mtm = restored.next_mtm;
        self.last_fee_distribution = restored.last_fee_distribution;
        self.current_time = restored.current_time;
        self.fee_engine = FeeEngine::new(self.config.fees.clone());
        self.fee_engine.set_liquidity_fee(restored.liquidity_fee);
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Transitions Proposed → Pending and enters the one-time opening
    /// auction.
    pub fn start_opening_auction(&mut self, now: i64) -> Result<()> {
        if self.state != MarketState::Proposed {
            return Err(ExecoreError::InvalidAuctionTransition {
                reason: format!("cannot start opening auction from state {}", self.state),
            });
        }
        self.current_time = now;
        self.state = MarketState::Pending;
        self.broker.send(MarketEvent::MarketStateUpdate {
            market: self.config.id,
            state: self.state,
        });
        info!(market = %self.config.id, "entering opening auction");
        self.enter_auction(now);
        Ok(())
    }

    /// Governance outcome: the market proposal was declined. Commitment
    /// bonds are refunded and every pending provision marked rejected.
    pub fn reject(&mut self, now: i64) -> Result<()> {
        if self.state != MarketState::Proposed {
            return Err(ExecoreError::CannotRejectMarket(self.state.to_string()));
        }
        self.current_time = now;
        for provision in self.liquidity.reject_all(now) {
            let refund = Transfer {
                party: provision.party.clone(),
                kind: TransferKind::BondHigh,
                amount: provision.commitment_amount,
            };
            if let Err(err) =
                self.collateral
                    .bond_update(&self.config.id, &refund, &self.config.asset)
            {
                error!(%err, party = %provision.party, "bond refund failed on rejection");
            }
            self.equity_shares.set_party_stake(provision.party.clone(), 0);
            self.broker
                .send(MarketEvent::LiquidityProvisionUpdate(provision));
        }
        self.state = MarketState::Rejected;
        self.broker.send(MarketEvent::MarketStateUpdate {
            market: self.config.id,
            state: self.state,
        });
        info!(market = %self.config.id, "market proposal rejected");
        Ok(())
    }

    /// Oracle hook: trading is over, only settlement remains.
    pub fn trading_terminated(&mut self, now: i64) {
        if self.closed() {
            return;
        }
        self.current_time = now;
        self.state = MarketState::TradingTerminated;
        self.broker.send(MarketEvent::MarketStateUpdate {
            market: self.config.id,
            state: self.state,
        });
    }

    /// Oracle hook: final settlement price received.
    pub fn settlement_data(&mut self, settlement_price: u64, now: i64) -> Result<()> {
        if self.state != MarketState::TradingTerminated {
            return Err(ExecoreError::SettlementFailed {
                reason: format!("settlement data received in state {}", self.state),
            });
        }
        self.current_time = now;
        let positions = self.positions.positions();
        let transfers = self.settlement.settle_mtm(settlement_price, &positions);
        self.collateral
            .mark_to_market(&self.config.id, &transfers, &self.config.asset)?;
        self.state = MarketState::Settled;
        self.broker.send(MarketEvent::MarketStateUpdate {
            market: self.config.id,
            state: self.state,
        });
        info!(market = %self.config.id, price = settlement_price, "market settled");
        Ok(())
    }

    // =====================================================================
    // Order submission
    // =====================================================================

    /// Validates and submits an order. The order's ID is minted here from
    /// the command's content hash; any caller-supplied ID is overwritten.
    pub fn submit_order(
        &mut self,
        mut order: Order,
        block_hash: &[u8],
    ) -> Result<OrderConfirmation> {
        let mut idgen = IdGenerator::new(block_hash, self.config.id);
        let now = self.current_time;

        order.id = idgen.next_order_id();
        order.created_at = now;
        order.updated_at = now;
        order.version = INITIAL_ORDER_VERSION;
        order.status = OrderStatus::Active;
        order.remaining = order.size;
        order.original_price = order.price;

        if let Err(err) = self.validate_order(&order) {
            self.reject_order(order, &err);
            return Err(err);
        }
        if let Err(err) = self.validate_accounts(&order.party) {
            self.reject_order(order, &err);
            return Err(err);
        }

        // Position registration first; margin is checked against the
        // worst case including this order, unless exposure shrinks.
        let exposure_before = self
            .positions
            .position(&order.party)
            .map_or(0, |p| p.exposure());
        self.positions.register_order(&order);
        let position = self
            .positions
            .position(&order.party)
            .unwrap_or_else(|| panic!("position missing after registration for {}", order.party));
        if position.exposure() >= exposure_before {
            if let Err(err) = self.apply_margin_check(&position, &order) {
                self.positions.unregister_order(&order);
                self.reject_order(order, &err);
                return Err(err);
            }
        }

        let confirmation = self.submit_validated_order(order, &mut idgen, now)?;
        self.command_liquidity_auction(now, &mut idgen)?;
        Ok(confirmation)
    }

    fn validate_order(&self, order: &Order) -> Result<()> {
        if self.closed() {
            return Err(ExecoreError::MarketClosed(self.config.id));
        }
        if order.market != self.config.id {
            return Err(ExecoreError::InvalidMarketId {
                order_market: order.market,
                market: self.config.id,
            });
        }
        if order.order_type == OrderType::Network {
            return Err(ExecoreError::InvalidOrderType);
        }
        if order.expires_at != 0 && order.expires_at < order.created_at {
            return Err(ExecoreError::InvalidExpirationTime {
                expires_at: order.expires_at,
                created_at: order.created_at,
            });
        }
        if order.time_in_force == TimeInForce::Gtt && order.expires_at == 0 {
            return Err(ExecoreError::InvalidOrder {
                reason: "GTT order requires an expiry".to_string(),
            });
        }
        if self.auction.in_auction() {
            if matches!(
                order.time_in_force,
                TimeInForce::Gfn | TimeInForce::Ioc | TimeInForce::Fok
            ) {
                return Err(ExecoreError::InvalidTimeInForceInAuction {
                    tif: format!("{:?}", order.time_in_force).to_uppercase(),
                });
            }
        } else if order.time_in_force == TimeInForce::Gfa {
            return Err(ExecoreError::GfaOrderDuringContinuousTrading);
        }
        validate_peg(order)
    }

    fn validate_accounts(&mut self, party: &PartyId) -> Result<()> {
        if !self.collateral.has_general_account(party, &self.config.asset) {
            return Err(ExecoreError::MissingGeneralAccount(party.clone()));
        }
        self.collateral
            .ensure_margin_account(&self.config.id, party, &self.config.asset)
    }

    fn apply_margin_check(&mut self, position: &MarketPosition, order: &Order) -> Result<()> {
        let required = self.risk.check_margin(position, order, self.mark_price)?;
        if let Some(transfer) = required {
            self.collateral
                .margin_update(&self.config.id, &transfer, &self.config.asset)
                .map_err(|_| ExecoreError::MarginCheckFailed(order.party.clone()))?;
        }
        Ok(())
    }

    fn reject_order(&mut self, mut order: Order, err: &ExecoreError) {
        order.status = OrderStatus::Rejected;
        order.reason = Some(err.reject_reason());
        debug!(order = %order.id, %err, "order rejected");
        self.broker.send(MarketEvent::OrderUpdate(order));
    }

    /// Post-validation submission path, shared with amend-resubmit and
    /// auction-exit unparking.
    fn submit_validated_order(
        &mut self,
        mut order: Order,
        idgen: &mut IdGenerator,
        now: i64,
    ) -> Result<OrderConfirmation> {
        // Pegged orders in auction never touch the book.
        if order.is_pegged() && self.auction.in_auction() {
            self.positions.unregister_order(&order);
            let parked = self.pegged.park(order, now);
            self.broker.send(MarketEvent::OrderUpdate(parked.clone()));
            return Ok(OrderConfirmation::from_order(parked));
        }
        // Pegged in continuous trading: derive the price or park.
        if let Some(pegged) = order.pegged {
            let bid = self.book.best_static_bid_price_and_volume().map(|(p, _)| p);
            let ask = self
                .book
                .best_static_offer_price_and_volume()
                .map(|(p, _)| p);
            match price_for_peg(&pegged, order.side, bid, ask) {
                Some(price) => order.price = price,
                None => {
                    self.positions.unregister_order(&order);
                    let parked = self.pegged.park(order, now);
                    self.broker.send(MarketEvent::OrderUpdate(parked.clone()));
                    return Ok(OrderConfirmation::from_order(parked));
                }
            }
        }

        // Price monitoring on the trades this order would cause; a flagged
        // auction flips the book into accumulation before submission.
        if !self.auction.in_auction() {
            let would_trade = self.book.get_trades(&order)?;
            for trade in &would_trade {
                if let Err(err) = self.price_monitor.check_price(
                    &mut self.auction,
                    now,
                    trade.price,
                    trade.size,
                    order.time_in_force.is_persistent(),
                ) {
                    self.positions.unregister_order(&order);
                    self.reject_order(order, &err);
                    return Err(err);
                }
            }
            if self.auction.auction_start() {
                self.enter_auction(now);
            }
        }

        let mut confirmation = match self.book.submit_order(&mut order) {
            Ok(confirmation) => confirmation,
            Err(err) => {
                self.positions.unregister_order(&order);
                self.reject_order(order, &err);
                return Err(err);
            }
        };

        if !self.auction.in_auction() && !confirmation.trades.is_empty() {
            let fee_transfers = self.fee_engine.calculate_continuous(&mut confirmation.trades);
            if let Err(err) =
                self.collateral
                    .transfer_fees(&self.config.id, &self.config.asset, &fee_transfers)
            {
                error!(%err, "fee transfer failed for continuous trades");
            }
        }

        self.apply_confirmation(&mut confirmation, idgen, now, true)?;
        Ok(confirmation)
    }

    /// Applies a confirmation: index maintenance, position and settlement
    /// updates, events, and (outside auctions) mark-to-market.
    fn apply_confirmation(
        &mut self,
        confirmation: &mut OrderConfirmation,
        idgen: &mut IdGenerator,
        now: i64,
        with_mtm: bool,
    ) -> Result<()> {
        if let Some(order) = &confirmation.order {
            if matches!(
                order.status,
                OrderStatus::Active | OrderStatus::PartiallyFilled
            ) {
                if order.is_expireable() {
                    self.expiring.insert(order.id, order.expires_at);
                }
                if order.is_pegged() {
                    self.pegged_live.insert(order.id);
                }
            } else if order.is_finished() && order.remaining > 0 {
                // A stopped or killed remainder never rests; its potential
                // volume comes back off the position.
                self.positions.unregister_order(order);
            }
        }

        let traded = !confirmation.trades.is_empty();
        for trade in &mut confirmation.trades {
            self.mark_price = trade.price;
            self.positions.update(trade);
            self.settlement.add_trade(trade);
            self.fee_splitter.add_trade_value(trade.value());
            self.broker.send(MarketEvent::TradeRecorded(trade.clone()));
        }
        if traded {
            self.target_stake
                .update_open_interest(now, self.positions.open_interest());
        }

        for passive in &confirmation.passive_orders_affected {
            if passive.is_finished() {
                if passive.is_expireable() {
                    self.expiring.remove(passive.id, passive.expires_at);
                }
                self.pegged_live.remove(&passive.id);
            }
            self.broker.send(MarketEvent::OrderUpdate(passive.clone()));
        }
        if let Some(order) = &confirmation.order {
            self.broker.send(MarketEvent::OrderUpdate(order.clone()));
        }

        if with_mtm && traded && !self.auction.in_auction() {
            self.confirm_mtm(idgen, now)?;
        }
        Ok(())
    }

    // =====================================================================
    // Amendment
    // =====================================================================

    pub fn amend_order(
        &mut self,
        amendment: &OrderAmendment,
        party: &PartyId,
        block_hash: &[u8],
    ) -> Result<OrderConfirmation> {
        if self.closed() {
            return Err(ExecoreError::MarketClosed(self.config.id));
        }
        let mut idgen = IdGenerator::new(block_hash, self.config.id);
        let now = self.current_time;
        let order_id = amendment
            .order_id
            .ok_or_else(|| ExecoreError::InvalidAmendment {
                reason: "missing order id".to_string(),
            })?;

        let existing = if let Some(parked) = self.pegged.get_parked(order_id) {
            parked.clone()
        } else {
            self.book.order_by_id(order_id)?
        };
        if existing.party != *party {
            return Err(ExecoreError::OrderNotOwned {
                party: party.clone(),
                order: order_id,
            });
        }
        if self.liquidity.is_liquidity_order(order_id) {
            return Err(ExecoreError::EditNotAllowed(order_id));
        }
        self.validate_amendment(amendment, &existing)?;

        let mut candidate = self.build_candidate(amendment, &existing)?;
        candidate.version = existing.version + 1;
        candidate.updated_at = now;

        // Size amended away entirely: cancel.
        if candidate.remaining == 0 {
            let confirmation = self.cancel_single(order_id, now)?;
            return Ok(OrderConfirmation::from_order(confirmation.order));
        }
        // Expiry amended into the past: the order expires now.
        if candidate.is_expireable() && candidate.expires_at <= now {
            let expired = self.finish_order(order_id, OrderStatus::Expired, now)?;
            return Ok(OrderConfirmation::from_order(expired));
        }

        // Margin first for anything that can raise exposure; rolled back
        // in full on failure.
        let raises_exposure = candidate.size > existing.size
            || (amendment.price.is_some() && candidate.price != existing.price);
        if raises_exposure {
            self.positions.amend_order(&existing, &candidate);
            let position = self
                .positions
                .position(party)
                .unwrap_or_else(|| panic!("position missing during amend for {party}"));
            if let Err(err) = self.apply_margin_check(&position, &candidate) {
                self.positions.amend_order(&candidate, &existing);
                return Err(err);
            }
        } else if candidate.size != existing.size {
            self.positions.amend_order(&existing, &candidate);
        }

        if existing.pegged.is_some() {
            return self.amend_pegged(existing, candidate, &mut idgen, now);
        }

        if candidate.price != existing.price || candidate.size > existing.size {
            // Cancel + resubmit: loses time priority, re-runs trade and
            // auction evaluation.
            if let Err(err) = self.book.cancel_order(order_id) {
                panic!("order {order_id} vanished mid-amend: {err}");
            }
            if existing.is_expireable() {
                self.expiring.remove(existing.id, existing.expires_at);
            }
            let confirmation = self.submit_validated_order(candidate, &mut idgen, now)?;
            self.command_liquidity_auction(now, &mut idgen)?;
            return Ok(confirmation);
        }

        // In-place: size decrease, TIF/expiry change, or a bare version
        // bump. Time priority is preserved.
        self.book.amend_order(&candidate)?;
        if existing.is_expireable() {
            self.expiring.remove(existing.id, existing.expires_at);
        }
        if candidate.is_expireable() {
            self.expiring.insert(candidate.id, candidate.expires_at);
        }
        self.broker.send(MarketEvent::OrderUpdate(candidate.clone()));
        Ok(OrderConfirmation::from_order(candidate))
    }

    fn validate_amendment(&self, amendment: &OrderAmendment, existing: &Order) -> Result<()> {
        if let Some(tif) = amendment.time_in_force {
            let gfx = |t: TimeInForce| matches!(t, TimeInForce::Gfa | TimeInForce::Gfn);
            if tif != existing.time_in_force && (gfx(tif) || gfx(existing.time_in_force)) {
                return Err(ExecoreError::InvalidAmendment {
                    reason: "cannot amend into or out of GFA/GFN".to_string(),
                });
            }
            let expiry = amendment.expires_at.unwrap_or(existing.expires_at);
            if tif == TimeInForce::Gtt && expiry == 0 {
                return Err(ExecoreError::IncompatibleTifExpiry);
            }
            if tif == TimeInForce::Gtc && expiry != 0 && amendment.expires_at.is_some() {
                return Err(ExecoreError::IncompatibleTifExpiry);
            }
        } else if amendment.expires_at.is_some() && existing.time_in_force != TimeInForce::Gtt {
            return Err(ExecoreError::IncompatibleTifExpiry);
        }
        if (amendment.pegged_offset.is_some() || amendment.pegged_reference.is_some())
            && existing.pegged.is_none()
        {
            return Err(ExecoreError::CannotAmendPeggedFields);
        }
        if amendment.price.is_some() && existing.pegged.is_some() {
            return Err(ExecoreError::InvalidAmendment {
                reason: "pegged order price is derived, amend the offset instead".to_string(),
            });
        }
        Ok(())
    }

    fn build_candidate(&self, amendment: &OrderAmendment, existing: &Order) -> Result<Order> {
        let mut candidate = existing.clone();
        if let Some(price) = amendment.price {
            candidate.price = price;
            candidate.original_price = price;
        }
        if amendment.size_delta != 0 {
            let remaining =
                i128::from(existing.remaining) + i128::from(amendment.size_delta);
            if remaining <= 0 {
                candidate.remaining = 0;
            } else {
                candidate.remaining =
                    u64::try_from(remaining).map_err(|_| ExecoreError::InvalidAmendment {
                        reason: "size delta overflow".to_string(),
                    })?;
                candidate.size = u64::try_from(
                    i128::from(existing.size) + i128::from(amendment.size_delta),
                )
                .map_err(|_| ExecoreError::InvalidAmendment {
                    reason: "size delta overflow".to_string(),
                })?;
            }
        }
        if let Some(tif) = amendment.time_in_force {
            candidate.time_in_force = tif;
            if tif != TimeInForce::Gtt {
                candidate.expires_at = 0;
            }
        }
        if let Some(expires_at) = amendment.expires_at {
            candidate.expires_at = expires_at;
        }
        if let Some(pegged) = &mut candidate.pegged {
            if let Some(offset) = amendment.pegged_offset {
                pegged.offset = offset;
            }
            if let Some(reference) = amendment.pegged_reference {
                pegged.reference = reference;
            }
        }
        Ok(candidate)
    }

    /// Pegged amendment: the peg may newly resolve (unpark) or newly fail
    /// (park); otherwise amend wherever the order currently lives.
    fn amend_pegged(
        &mut self,
        existing: Order,
        mut candidate: Order,
        idgen: &mut IdGenerator,
        now: i64,
    ) -> Result<OrderConfirmation> {
        let pegged = candidate
            .pegged
            .unwrap_or_else(|| panic!("pegged amend on non-pegged order {}", candidate.id));
        let was_parked = self.pegged.is_parked(existing.id);

        if self.auction.in_auction() {
            // Nothing reprices during an auction.
            self.pegged.amend_parked(candidate.clone());
            self.broker.send(MarketEvent::OrderUpdate(candidate.clone()));
            return Ok(OrderConfirmation::from_order(candidate));
        }

        let bid = self.book.best_static_bid_price_and_volume().map(|(p, _)| p);
        let ask = self
            .book
            .best_static_offer_price_and_volume()
            .map(|(p, _)| p);
        let repriced = price_for_peg(&pegged, candidate.side, bid, ask);

        match (was_parked, repriced) {
            (true, Some(price)) => {
                // Unpark and resubmit.
                self.pegged.unpark(existing.id);
                candidate.price = price;
                candidate.status = OrderStatus::Active;
                self.positions.register_order(&candidate);
                self.submit_validated_order(candidate, idgen, now)
            }
            (true, None) => {
                self.pegged.amend_parked(candidate.clone());
                self.broker.send(MarketEvent::OrderUpdate(candidate.clone()));
                Ok(OrderConfirmation::from_order(candidate))
            }
            (false, Some(price)) => {
                if let Err(err) = self.book.cancel_order(existing.id) {
                    panic!("pegged order {} vanished mid-amend: {err}", existing.id);
                }
                self.pegged_live.remove(&existing.id);
                candidate.price = price;
                self.submit_validated_order(candidate, idgen, now)
            }
            (false, None) => {
                // Repricing now fails: pull from the book and park.
                if let Err(err) = self.book.cancel_order(existing.id) {
                    panic!("pegged order {} vanished mid-amend: {err}", existing.id);
                }
                self.pegged_live.remove(&existing.id);
                self.positions.unregister_order(&candidate);
                let parked = self.pegged.park(candidate, now);
                self.broker.send(MarketEvent::OrderUpdate(parked.clone()));
                Ok(OrderConfirmation::from_order(parked))
            }
        }
    }

    // =====================================================================
    // Cancellation
    // =====================================================================

    pub fn cancel_order(
        &mut self,
        party: &PartyId,
        order_id: OrderId,
    ) -> Result<CancellationConfirmation> {
        if self.closed() {
            return Err(ExecoreError::MarketClosed(self.config.id));
        }
        let now = self.current_time;
        let existing = if let Some(parked) = self.pegged.get_parked(order_id) {
            parked.clone()
        } else {
            self.book.order_by_id(order_id)?
        };
        if existing.party != *party {
            return Err(ExecoreError::OrderNotOwned {
                party: party.clone(),
                order: order_id,
            });
        }
        if self.liquidity.is_liquidity_order(order_id) {
            return Err(ExecoreError::EditNotAllowed(order_id));
        }
        let confirmation = self.cancel_single(order_id, now)?;
        self.release_excess_margin(party);
        Ok(confirmation)
    }

    /// Cancels all of a party's orders. Liquidity-provision orders are
    /// silently excluded — the committed shape must stay on the book.
    pub fn cancel_all_orders(&mut self, party: &PartyId) -> Result<Vec<CancellationConfirmation>> {
        if self.closed() {
            return Err(ExecoreError::MarketClosed(self.config.id));
        }
        let now = self.current_time;
        let mut ids: BTreeSet<OrderId> = self
            .book
            .orders_for_party(party)
            .into_iter()
            .map(|o| o.id)
            .collect();
        ids.extend(
            self.pegged
                .parked()
                .iter()
                .filter(|o| o.party == *party)
                .map(|o| o.id),
        );
        ids.retain(|id| !self.liquidity.is_liquidity_order(*id));

        let mut confirmations = Vec::with_capacity(ids.len());
        for id in ids {
            confirmations.push(self.cancel_single(id, now)?);
        }
        self.release_excess_margin(party);
        Ok(confirmations)
    }

    /// Removes one order from wherever it lives and stamps it Cancelled.
    fn cancel_single(&mut self, order_id: OrderId, now: i64) -> Result<CancellationConfirmation> {
        let order = self.finish_order(order_id, OrderStatus::Cancelled, now)?;
        Ok(CancellationConfirmation { order })
    }

    /// Shared removal for cancel and expiry: pulls the order from the book
    /// or the parked set, clears every index, and emits the final status.
    fn finish_order(&mut self, order_id: OrderId, status: OrderStatus, now: i64) -> Result<Order> {
        let mut order = if let Some(parked) = self.pegged.unpark(order_id) {
            parked
        } else {
            let confirmation = self.book.cancel_order(order_id)?;
            let order = confirmation.order;
            self.positions.unregister_order(&order);
            order
        };
        if order.is_expireable() {
            self.expiring.remove(order.id, order.expires_at);
        }
        self.pegged_live.remove(&order.id);
        order.status = status;
        order.updated_at = now;
        self.broker.send(MarketEvent::OrderUpdate(order.clone()));
        Ok(order)
    }

    /// A party with no open volume and nothing resting gets its margin
    /// account swept back to general.
    fn release_excess_margin(&mut self, party: &PartyId) {
        let flat = self
            .positions
            .position(party)
            .is_none_or(|p| p.size == 0 && p.buy == 0 && p.sell == 0);
        if !flat {
            return;
        }
        let (margin, _) =
            self.collateral
                .margin_and_general_balance(&self.config.id, party, &self.config.asset);
        if margin == 0 {
            return;
        }
        let release = Transfer {
            party: party.clone(),
            kind: TransferKind::MarginHigh,
            amount: margin,
        };
        if let Err(err) = self
            .collateral
            .margin_update(&self.config.id, &release, &self.config.asset)
        {
            warn!(%err, %party, "failed to release excess margin");
        }
    }

    // =====================================================================
    // Liquidity provision
    // =====================================================================

    pub fn submit_liquidity_provision(
        &mut self,
        submission: LiquidityProvisionSubmission,
        party: &PartyId,
        block_hash: &[u8],
    ) -> Result<()> {
        if self.closed() {
            return Err(ExecoreError::MarketClosed(self.config.id));
        }
        let mut idgen = IdGenerator::new(block_hash, self.config.id);
        let now = self.current_time;
        if submission.market != self.config.id {
            return Err(ExecoreError::InvalidLiquidityCommitment {
                reason: "submission targets a different market".to_string(),
            });
        }
        if !self.collateral.has_general_account(party, &self.config.asset) {
            return Err(ExecoreError::MissingGeneralAccount(party.clone()));
        }

        // Reductions may not drag the market below its target stake.
        if let Some(existing) = self.liquidity.provision(party) {
            if submission.commitment_amount < existing.commitment_amount {
                let reduced = self.liquidity.total_stake()
                    - Decimal::from(existing.commitment_amount)
                    + Decimal::from(submission.commitment_amount);
                if reduced < self.last_target_stake {
                    return Err(ExecoreError::CommitmentReductionNotAllowed);
                }
            }
        }

        if let Some(reason) = submission.validate() {
            return Err(ExecoreError::InvalidLiquidityCommitment {
                reason: reason.to_string(),
            });
        }

        self.collateral
            .ensure_margin_account(&self.config.id, party, &self.config.asset)?;
        self.collateral
            .ensure_bond_account(&self.config.id, party, &self.config.asset)?;

        // The commitment delta moves between the general and bond
        // accounts before the provision is recorded.
        let previous = self
            .liquidity
            .provision(party)
            .map_or(0, |p| p.commitment_amount);
        if submission.commitment_amount != previous {
            let (kind, amount) = if submission.commitment_amount > previous {
                (TransferKind::BondLow, submission.commitment_amount - previous)
            } else {
                (TransferKind::BondHigh, previous - submission.commitment_amount)
            };
            self.collateral.bond_update(
                &self.config.id,
                &Transfer {
                    party: party.clone(),
                    kind,
                    amount,
                },
                &self.config.asset,
            )?;
        }

        let provision = self.liquidity.submit(submission, party.clone(), now)?;
        self.equity_shares
            .set_party_stake(party.clone(), provision.commitment_amount);
        self.broker
            .send(MarketEvent::LiquidityProvisionUpdate(provision));

        if !self.auction.in_auction() {
            self.deploy_liquidity_orders(party, &mut idgen, now);
        }
        self.update_liquidity_fee();
        self.command_liquidity_auction(now, &mut idgen)?;
        Ok(())
    }

    pub fn cancel_liquidity_provision(&mut self, party: &PartyId) -> Result<()> {
        let now = self.current_time;
        let existing = self
            .liquidity
            .provision(party)
            .ok_or_else(|| ExecoreError::LiquidityProvisionNotFound(party.clone()))?;
        let remaining = self.liquidity.total_stake() - Decimal::from(existing.commitment_amount);
        if remaining < self.last_target_stake {
            return Err(ExecoreError::CommitmentReductionNotAllowed);
        }
        self.remove_deployed_orders(party, now);
        let provision = self.liquidity.cancel(party, now)?;
        let release = Transfer {
            party: party.clone(),
            kind: TransferKind::BondHigh,
            amount: provision.commitment_amount,
        };
        if let Err(err) = self
            .collateral
            .bond_update(&self.config.id, &release, &self.config.asset)
        {
            error!(%err, %party, "bond release failed on commitment cancellation");
        }
        self.equity_shares.set_party_stake(party.clone(), 0);
        self.broker
            .send(MarketEvent::LiquidityProvisionUpdate(provision));
        self.update_liquidity_fee();
        Ok(())
    }

    fn remove_deployed_orders(&mut self, party: &PartyId, now: i64) {
        for id in self.liquidity.take_orders(party) {
            match self.book.cancel_order(id) {
                Ok(confirmation) => {
                    let mut order = confirmation.order;
                    self.positions.unregister_order(&order);
                    self.pegged_live.remove(&order.id);
                    order.status = OrderStatus::Cancelled;
                    order.updated_at = now;
                    self.broker.send(MarketEvent::OrderUpdate(order));
                }
                // Parked or already gone.
                Err(_) => {
                    if let Some(mut parked) = self.pegged.unpark(id) {
                        parked.status = OrderStatus::Cancelled;
                        parked.updated_at = now;
                        self.broker.send(MarketEvent::OrderUpdate(parked));
                    }
                }
            }
        }
    }

    /// Derives and places the orders implementing a party's commitment,
    /// replacing any previous deployment.
    fn deploy_liquidity_orders(&mut self, party: &PartyId, idgen: &mut IdGenerator, now: i64) {
        let Some(provision) = self.liquidity.provision(party).cloned() else {
            return;
        };
        self.remove_deployed_orders(party, now);

        let bid = self.book.best_static_bid_price_and_volume().map(|(p, _)| p);
        let ask = self
            .book
            .best_static_offer_price_and_volume()
            .map(|(p, _)| p);
        let Some(specs) = provision_orders(&provision, bid, ask) else {
            debug!(%party, "liquidity shape unpriceable, commitment stays pending");
            self.liquidity
                .set_status(party, LiquidityProvisionStatus::Pending, now);
            return;
        };

        for spec in specs {
            let mut order = Order {
                id: idgen.next_order_id(),
                market: self.config.id,
                party: party.clone(),
                side: spec.side,
                size: spec.size,
                remaining: spec.size,
                price: spec.price,
                original_price: 0,
                order_type: OrderType::Limit,
                time_in_force: TimeInForce::Gtc,
                status: OrderStatus::Active,
                reason: None,
                pegged: Some(execore_types::PeggedOrder {
                    reference: spec.reference,
                    offset: spec.offset,
                }),
                created_at: now,
                updated_at: now,
                expires_at: 0,
                version: INITIAL_ORDER_VERSION,
                reference: "liquidity-commitment".to_string(),
            };
            self.positions.register_order(&order);
            match self.book.submit_order(&mut order) {
                Ok(confirmation) => {
                    self.liquidity.record_order(party, order.id);
                    self.pegged_live.insert(order.id);
                    for passive in &confirmation.passive_orders_affected {
                        self.broker.send(MarketEvent::OrderUpdate(passive.clone()));
                    }
                    self.broker.send(MarketEvent::OrderUpdate(order));
                }
                Err(err) => {
                    self.positions.unregister_order(&order);
                    warn!(%err, %party, "liquidity order rejected by book");
                }
            }
        }
        self.liquidity
            .set_status(party, LiquidityProvisionStatus::Active, now);
        if let Some(updated) = self.liquidity.provision(party) {
            self.broker
                .send(MarketEvent::LiquidityProvisionUpdate(updated.clone()));
        }
    }

    /// Recomputes the liquidity fee from the committed-fee auction and
    /// pushes it into the fee engine when it moved.
    fn update_liquidity_fee(&mut self) {
        let factors = self.risk.factors();
        let target = self
            .target_stake
            .target_stake(self.current_time, self.mark_price, factors);
        self.last_target_stake = target;
        let fee = self.liquidity.fee_for_target(target);
        if fee != self.fee_engine.liquidity_fee() {
            self.fee_engine.set_liquidity_fee(fee);
            self.broker
                .send(MarketEvent::MarketDataUpdate(Box::new(self.market_data())));
        }
    }

    fn update_market_value_proxy(&mut self) {
        let mvp = self.fee_splitter.market_value_proxy(
            self.config.market_value_window_length,
            self.liquidity.total_stake(),
        );
        self.last_mvp = mvp;
        self.equity_shares.avg_trade_value(mvp);
    }

    /// Distributes accrued liquidity fees to providers by equity share.
    /// The indivisible remainder stays in the fee account for next time.
    fn distribute_liquidity_fees(&mut self) -> Result<()> {
        let balance = self
            .collateral
            .liquidity_fee_balance(&self.config.id, &self.config.asset);
        if balance == 0 {
            return Ok(());
        }
        let shares = self.equity_shares.all_shares();
        if shares.is_empty() {
            return Ok(());
        }
        let balance_dec = Decimal::from(balance);
        let mut transfers = Vec::with_capacity(shares.len());
        for (party, share) in shares {
            let amount = (balance_dec * share)
                .floor()
                .to_u64()
                .ok_or_else(|| ExecoreError::Internal("fee share out of range".to_string()))?;
            if amount == 0 {
                continue;
            }
            transfers.push(Transfer {
                party,
                kind: TransferKind::LiquidityFeeDistribute,
                amount,
            });
        }
        self.collateral
            .transfer_fees(&self.config.id, &self.config.asset, &transfers)?;
        Ok(())
    }

    // =====================================================================
    // Auctions
    // =====================================================================

    fn enter_auction(&mut self, now: i64) {
        // Orders the mode switch invalidates (GFN) come straight off.
        for mut order in self.book.enter_auction() {
            self.positions.unregister_order(&order);
            if order.is_expireable() {
                self.expiring.remove(order.id, order.expires_at);
            }
            self.pegged_live.remove(&order.id);
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            self.broker.send(MarketEvent::OrderUpdate(order));
        }

        // Every live pegged order is parked for the duration.
        let live: Vec<OrderId> = self.pegged_live.iter().copied().collect();
        self.pegged_live.clear();
        for id in live {
            match self.book.cancel_order(id) {
                Ok(confirmation) => {
                    let order = confirmation.order;
                    self.positions.unregister_order(&order);
                    if order.is_expireable() {
                        self.expiring.remove(order.id, order.expires_at);
                    }
                    let parked = self.pegged.park(order, now);
                    self.broker.send(MarketEvent::OrderUpdate(parked));
                }
                Err(err) => debug!(order = %id, %err, "pegged order gone before parking"),
            }
        }
        for cancelled in self.pegged.entering_auction(now) {
            self.broker.send(MarketEvent::OrderUpdate(cancelled));
        }

        let trigger = self.auction.trigger();
        if matches!(trigger, AuctionTrigger::Price | AuctionTrigger::Liquidity) {
            self.state = MarketState::Suspended;
            self.broker.send(MarketEvent::MarketStateUpdate {
                market: self.config.id,
                state: self.state,
            });
        }
        self.auction.auction_started();
        self.broker.send(MarketEvent::AuctionEntered {
            market: self.config.id,
            trigger,
            start: self.auction.begin().unwrap_or(now),
            end: self.auction.expires_at().unwrap_or(0),
        });
        info!(market = %self.config.id, %trigger, "auction entered");
    }

    fn leave_auction(&mut self, idgen: &mut IdGenerator, now: i64) -> Result<()> {
        let (mut confirmations, to_cancel) = self.book.leave_auction(now)?;

        let mut fee_transfers = Vec::new();
        for confirmation in &mut confirmations {
            fee_transfers.extend(self.fee_engine.calculate_auction(&mut confirmation.trades));
        }
        if !fee_transfers.is_empty() {
            if let Err(err) =
                self.collateral
                    .transfer_fees(&self.config.id, &self.config.asset, &fee_transfers)
            {
                error!(%err, "fee transfer failed for auction uncrossing");
            }
        }
        for confirmation in &mut confirmations {
            // MTM resumes on the next tick, once the auction has closed.
            self.apply_confirmation(confirmation, idgen, now, false)?;
        }
        // Orders the book could not carry into continuous trading (GFA)
        // have already been pulled; only the cleanup is ours.
        for mut order in to_cancel {
            self.positions.unregister_order(&order);
            if order.is_expireable() {
                self.expiring.remove(order.id, order.expires_at);
            }
            self.pegged_live.remove(&order.id);
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            self.broker.send(MarketEvent::OrderUpdate(order));
        }

        let trigger = self.auction.left()?;
        match trigger {
            AuctionTrigger::Opening => {
                self.state = MarketState::Active;
                self.broker.send(MarketEvent::MarketStateUpdate {
                    market: self.config.id,
                    state: self.state,
                });
                self.equity_shares.opening_auction_ended();
                self.fee_splitter.time_window_start(now);
            }
            _ => {
                if self.state == MarketState::Suspended {
                    self.state = MarketState::Active;
                    self.broker.send(MarketEvent::MarketStateUpdate {
                        market: self.config.id,
                        state: self.state,
                    });
                }
            }
        }

        // Parked orders re-enter against the fresh book. Deployed
        // liquidity orders were parked with the rest on auction entry;
        // each commitment is rebuilt from scratch below, so the parked
        // copies are retired rather than resubmitted.
        let (stale_deployments, parked): (Vec<Order>, Vec<Order>) = self
            .pegged
            .drain()
            .into_iter()
            .partition(|order| self.liquidity.is_liquidity_order(order.id));
        for mut order in stale_deployments {
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            self.broker.send(MarketEvent::OrderUpdate(order));
        }
        let lp_parties: Vec<PartyId> = self.liquidity.providers().map(|p| p.party.clone()).collect();
        for party in &lp_parties {
            self.deploy_liquidity_orders(party, idgen, now);
        }
        for mut order in parked {
            let pegged = order
                .pegged
                .unwrap_or_else(|| panic!("non-pegged order {} in parked set", order.id));
            let bid = self.book.best_static_bid_price_and_volume().map(|(p, _)| p);
            let ask = self
                .book
                .best_static_offer_price_and_volume()
                .map(|(p, _)| p);
            match price_for_peg(&pegged, order.side, bid, ask) {
                Some(price) => {
                    order.price = price;
                    order.status = OrderStatus::Active;
                    self.positions.register_order(&order);
                    if let Err(err) = self.submit_validated_order(order, idgen, now) {
                        debug!(%err, "parked order rejected on auction exit");
                    }
                }
                None => {
                    let parked = self.pegged.park(order, now);
                    self.broker.send(MarketEvent::OrderUpdate(parked));
                }
            }
        }

        self.update_market_value_proxy();
        self.update_liquidity_fee();
        self.broker.send(MarketEvent::AuctionLeft {
            market: self.config.id,
            trigger,
        });
        info!(market = %self.config.id, %trigger, "auction left");
        Ok(())
    }

    /// Decides whether a liquidity auction must start or can end; called
    /// after every book-affecting operation.
    fn command_liquidity_auction(&mut self, now: i64, idgen: &mut IdGenerator) -> Result<()> {
        let supplied = self.liquidity.total_stake();
        let target = self.last_target_stake;
        let bid = self.book.best_static_bid_price_and_volume();
        let ask = self.book.best_static_offer_price_and_volume();
        if self.auction.in_auction() {
            if !self.auction.is_liquidity_auction() {
                return Ok(());
            }
            let indicative = self.book.indicative_price_and_volume();
            self.liquidity_monitor.check_liquidity(
                &mut self.auction,
                now,
                supplied,
                target,
                indicative,
                bid,
                ask,
            );
            if self.auction.can_leave() {
                // Exit confirmed only if the indicative price would not
                // immediately re-trigger price monitoring.
                let (price, volume) = indicative;
                if volume > 0 {
                    self.price_monitor
                        .check_price(&mut self.auction, now, price, volume, true)?;
                }
                if self.auction.can_leave() {
                    self.leave_auction(idgen, now)?;
                }
            }
        } else {
            self.liquidity_monitor.check_liquidity(
                &mut self.auction,
                now,
                supplied,
                target,
                (0, 0),
                bid,
                ask,
            );
            if self.auction.auction_start() {
                self.enter_auction(now);
            }
        }
        Ok(())
    }

    /// Generic per-tick auction maintenance.
    fn check_auction(&mut self, now: i64, idgen: &mut IdGenerator) -> Result<()> {
        if !self.auction.in_auction() {
            return self.command_liquidity_auction(now, idgen);
        }
        if self.auction.is_opening_auction() {
            let (price, volume) = self.book.indicative_price_and_volume();
            if self.auction.duration_exceeded(now) && volume > 0 {
                self.price_monitor
                    .check_price(&mut self.auction, now, price, volume, true)?;
                if self.auction.take_extension().is_none() {
                    self.auction.set_ready_to_leave();
                    self.leave_auction(idgen, now)?;
                }
            }
        } else if self.auction.is_liquidity_auction() {
            self.command_liquidity_auction(now, idgen)?;
        } else if self.auction.is_price_auction() && self.auction.duration_exceeded(now) {
            self.auction.set_ready_to_leave();
            self.leave_auction(idgen, now)?;
        }
        Ok(())
    }

    // =====================================================================
    // Parameter updates
    // =====================================================================

    /// Governance update for the rolling window feeding the market-value
    /// proxy.
    pub fn update_market_value_window_length(&mut self, length: i64) {
        self.config.market_value_window_length = length;
    }

    /// Governance update for the liquidity-fee distribution interval.
    pub fn update_liquidity_fee_distribution_interval(&mut self, interval: i64) {
        self.config.liquidity_fee_distribution_interval = interval;
    }

    /// Governance update for the auction minimum duration. A raised
    /// minimum may push out a running auction's scheduled end.
    pub fn update_auction_min_duration(&mut self, duration: i64) {
        if let Some(end) = self.auction.update_min_duration(duration) {
            self.broker.send(MarketEvent::AuctionExtended {
                market: self.config.id,
                trigger: self.auction.trigger(),
                end,
            });
        }
    }

    // =====================================================================
    // Time
    // =====================================================================

    /// The single time-driven entry point.
    pub fn on_tick(&mut self, now: i64, block_hash: &[u8]) -> Result<()> {
        let mut idgen = IdGenerator::new(block_hash, self.config.id);
        self.current_time = now;

        // 1. Expiry, only when the market can trade.
        if !self.closed() && self.state != MarketState::Proposed {
            for order_id in self.expiring.expire(now) {
                if let Err(err) = self.finish_order(order_id, OrderStatus::Expired, now) {
                    debug!(order = %order_id, %err, "expiring order already gone");
                }
            }
        }

        // 2. Forward time to the monitors and the fee window.
        self.price_monitor.on_time_update(now);
        self.fee_splitter.set_current_time(now)?;

        // 3. Scheduled close: past `closing_at` only settlement remains.
        if !self.closed()
            && self.state != MarketState::Proposed
            && self.config.closing_at > 0
            && now >= self.config.closing_at
        {
            info!(
                market = %self.config.id,
                at = %execore_types::time::format_nanos(now),
                "market reached its scheduled close"
            );
            self.trading_terminated(now);
        }

        // 4. Nothing else to do before open or after termination.
        if self.state == MarketState::Proposed || self.closed() {
            return Ok(());
        }

        // 5. Periodic liquidity-fee distribution. A failure here means the
        // ledger is corrupt; continuing would fork the replay.
        if now - self.last_fee_distribution >= self.config.liquidity_fee_distribution_interval {
            if let Err(err) = self.distribute_liquidity_fees() {
                panic!("liquidity fee distribution failed: {err}");
            }
            self.last_fee_distribution = now;
        }

        // 6. Auction maintenance.
        self.check_auction(now, &mut idgen)?;

        // 7. Scheduled mark-to-market.
        if self.mark_price > 0 && !self.auction.in_auction() && now >= self.next_mtm {
            self.confirm_mtm(&mut idgen, now)?;
            self.next_mtm = now + self.config.mark_to_market_interval;
        }

        // 8. Derived aggregates.
        if now - self.fee_splitter.window_start() >= self.config.market_value_window_length {
            self.fee_splitter.time_window_start(now);
        }
        self.update_market_value_proxy();
        self.update_liquidity_fee();

        // 9. Tick event.
        self.broker.send(MarketEvent::MarketTick {
            market: self.config.id,
            time: now,
        });
        Ok(())
    }

    // =====================================================================
    // Mark-to-market and close-out
    // =====================================================================

    fn confirm_mtm(&mut self, idgen: &mut IdGenerator, now: i64) -> Result<()> {
        if self.mark_price == 0 {
            return Ok(());
        }
        let positions = self.positions.positions();
        let transfers = self.settlement.settle_mtm(self.mark_price, &positions);
        if !transfers.is_empty() {
            self.collateral
                .mark_to_market(&self.config.id, &transfers, &self.config.asset)?;
        }

        let updates = self.risk.update_margins(&positions, self.mark_price, &|party| {
            self.collateral
                .margin_and_general_balance(&self.config.id, party, &self.config.asset)
        });

        let mut closed: Vec<PartyId> = Vec::new();
        for update in updates {
            if let Some(penalty) = &update.bond_penalty {
                if let Err(err) =
                    self.collateral
                        .bond_update(&self.config.id, penalty, &self.config.asset)
                {
                    // Skip this party, keep settling the rest.
                    error!(%err, party = %update.party, "bond slash failed");
                    continue;
                }
            }
            if update.closed {
                closed.push(update.party);
                continue;
            }
            if let Some(transfer) = &update.transfer {
                if let Err(err) =
                    self.collateral
                        .margin_update(&self.config.id, transfer, &self.config.asset)
                {
                    warn!(%err, party = %update.party, "margin top-up failed, party distressed");
                    closed.push(update.party);
                }
            }
        }
        if !closed.is_empty() {
            self.resolve_closed_out_parties(&closed, idgen, now)?;
        }
        Ok(())
    }

    /// Close-out: pull the distressed parties' orders, re-check margins,
    /// and net off whatever exposure remains against the book through a
    /// synthetic network order.
    fn resolve_closed_out_parties(
        &mut self,
        parties: &[PartyId],
        idgen: &mut IdGenerator,
        now: i64,
    ) -> Result<()> {
        // Resting orders come off the book first; that alone may restore
        // adequate margin.
        for mut order in self.book.remove_distressed_orders(parties)? {
            self.positions.unregister_order(&order);
            if order.is_expireable() {
                self.expiring.remove(order.id, order.expires_at);
            }
            self.pegged_live.remove(&order.id);
            order.status = OrderStatus::Stopped;
            order.updated_at = now;
            self.broker.send(MarketEvent::OrderUpdate(order));
        }
        for party in parties {
            for stopped in self
                .pegged
                .remove_all_for_party(party, OrderStatus::Stopped, now)
            {
                self.broker.send(MarketEvent::OrderUpdate(stopped));
            }
        }

        let positions: Vec<MarketPosition> = parties
            .iter()
            .filter_map(|p| self.positions.position(p))
            .collect();
        let still_distressed = self.risk.expect_margins(&positions, self.mark_price, &|party| {
            self.collateral
                .margin_and_general_balance(&self.config.id, party, &self.config.asset)
        });
        if still_distressed.is_empty() {
            return Ok(());
        }

        let distressed_positions: Vec<MarketPosition> = positions
            .into_iter()
            .filter(|p| still_distressed.contains(&p.party))
            .collect();
        let net: i64 = distressed_positions.iter().map(|p| p.size).sum();
        if net == 0 {
            // Flat overall; no book interaction needed.
            self.finalize_close_out(&distressed_positions, self.mark_price, idgen, 0, now);
            return Ok(());
        }

        let mut network_order = Order {
            id: idgen.next_order_id(),
            market: self.config.id,
            party: PartyId::network(),
            // Net longs are sold off to the book, net shorts bought back.
            side: if net > 0 { Side::Sell } else { Side::Buy },
            size: net.unsigned_abs(),
            remaining: net.unsigned_abs(),
            price: 0,
            original_price: 0,
            order_type: OrderType::Network,
            time_in_force: TimeInForce::Fok,
            status: OrderStatus::Active,
            reason: None,
            pegged: None,
            created_at: now,
            updated_at: now,
            expires_at: 0,
            version: INITIAL_ORDER_VERSION,
            reference: "network-close-out".to_string(),
        };

        // If the book cannot absorb the whole order, resolution is
        // deferred, not failed: the next MTM retries.
        let absorbed: u64 = self
            .book
            .get_trades(&network_order)?
            .iter()
            .map(|t| t.size)
            .sum();
        if absorbed < network_order.size {
            warn!(
                market = %self.config.id,
                required = network_order.size,
                absorbed,
                "book cannot absorb close-out, deferring"
            );
            return Ok(());
        }

        let mut confirmation = self.book.submit_order(&mut network_order)?;
        // Widened so the volume-weighted close price cannot overflow.
        let mut traded_value: u128 = 0;
        let mut traded_size: u64 = 0;
        for trade in &mut confirmation.trades {
            trade.trade_type = TradeType::NetworkCloseOutGood;
            traded_value += u128::from(trade.price) * u128::from(trade.size);
            traded_size += trade.size;
            self.positions.update(trade);
            self.settlement.add_trade(trade);
            self.broker.send(MarketEvent::TradeRecorded(trade.clone()));
        }
        for passive in &confirmation.passive_orders_affected {
            self.broker.send(MarketEvent::OrderUpdate(passive.clone()));
        }
        let close_price = if traded_size > 0 {
            // The average of u64 prices always fits back into u64.
            u64::try_from(traded_value / u128::from(traded_size)).unwrap_or(u64::MAX)
        } else {
            self.mark_price
        };

        // Fees for the resolution: passive parties keep their maker fee,
        // paid from the insurance-backed network side.
        let maker_fees: Vec<Transfer> = self
            .fee_engine
            .calculate_continuous(&mut confirmation.trades)
            .into_iter()
            .filter(|t| t.kind == TransferKind::MakerFeeReceive)
            .collect();
        if !maker_fees.is_empty() {
            if let Err(err) =
                self.collateral
                    .transfer_fees(&self.config.id, &self.config.asset, &maker_fees)
            {
                error!(%err, "close-out fee transfer failed");
            }
        }

        self.finalize_close_out(
            &distressed_positions,
            close_price,
            idgen,
            confirmation.trades.len() as u64,
            now,
        );
        Ok(())
    }

    /// Records the synthetic bad-party trades, wipes the parties from
    /// every engine, and cancels their liquidity commitments.
    fn finalize_close_out(
        &mut self,
        distressed: &[MarketPosition],
        close_price: u64,
        idgen: &mut IdGenerator,
        fill_index_base: u64,
        now: i64,
    ) {
        let network = PartyId::network();
        for (index, position) in distressed.iter().enumerate() {
            if position.size != 0 {
                let size = position.size.unsigned_abs();
                let (buyer, seller) = if position.size > 0 {
                    (network.clone(), position.party.clone())
                } else {
                    (position.party.clone(), network.clone())
                };
                let order_id = idgen.next_order_id();
                let trade = Trade {
                    id: IdGenerator::trade_id(order_id, fill_index_base + index as u64),
                    market: self.config.id,
                    price: close_price,
                    size,
                    buyer,
                    seller,
                    aggressor: if position.size > 0 { Side::Sell } else { Side::Buy },
                    buy_order: order_id,
                    sell_order: order_id,
                    timestamp: now,
                    trade_type: TradeType::NetworkCloseOutBad,
                    buyer_fee: Fee::default(),
                    seller_fee: Fee::default(),
                };
                self.settlement.add_trade(&trade);
                self.broker.send(MarketEvent::TradeRecorded(trade));
            }

            let party = &position.party;
            if self.liquidity.is_liquidity_provider(party) {
                self.remove_deployed_orders(party, now);
                if let Some(provision) = self.liquidity.stop(party, now) {
                    self.broker
                        .send(MarketEvent::LiquidityProvisionUpdate(provision));
                }
                self.equity_shares.set_party_stake(party.clone(), 0);
            }
            if let Err(err) = self
                .collateral
                .clear_party(&self.config.id, party, &self.config.asset)
            {
                error!(%err, %party, "failed to clear closed-out party accounts");
            }
            self.broker.send(MarketEvent::PartyClosedOut {
                market: self.config.id,
                party: party.clone(),
            });
        }

        let parties: Vec<PartyId> = distressed.iter().map(|p| p.party.clone()).collect();
        self.positions.remove_distressed(&parties);
        self.settlement.remove_distressed(&parties);
        self.update_liquidity_fee();
    }
}
