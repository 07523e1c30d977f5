//! Pegged orders: price derivation from the static book, parking when a
//! reference is unavailable, shape validation, and the park/unpark cycle
//! around a price-monitoring auction.

use execore_market::testkit::{
    test_market, test_market_with, TestLiquidityMonitor, TestMarket, TestPriceMonitor,
};
use execore_types::{
    ExecoreError, MarketConfig, MarketId, MarketState, Order, OrderStatus, PartyId, PeggedOrder,
    PeggedReference, Side, TradingMode,
};

const SECOND: i64 = 1_000_000_000;

fn market_id() -> MarketId {
    MarketId::from_bytes([12u8; 16])
}

fn order(market: MarketId, party: &str, side: Side, price: u64, size: u64) -> Order {
    Order::dummy_limit(market, party, side, price, size)
}

fn pegged_order(
    market: MarketId,
    party: &str,
    side: Side,
    reference: PeggedReference,
    offset: i64,
    size: u64,
) -> Order {
    let mut order = Order::dummy_limit(market, party, side, 0, size);
    order.pegged = Some(PeggedOrder { reference, offset });
    order
}

fn party(name: &str) -> PartyId {
    PartyId::new(name)
}

/// Opens the market leaving best bid 98 and best ask 100 resting.
fn open_with_spread(tm: &mut TestMarket) {
    let id = tm.market.id();
    for name in ["alice", "bob"] {
        tm.ledger.deposit(&party(name), 100_000);
    }
    tm.market.start_opening_auction(0).unwrap();
    tm.market
        .submit_order(order(id, "alice", Side::Buy, 98, 20), b"cmd-1")
        .unwrap();
    tm.market
        .submit_order(order(id, "alice", Side::Buy, 100, 5), b"cmd-2")
        .unwrap();
    tm.market
        .submit_order(order(id, "bob", Side::Sell, 100, 25), b"cmd-3")
        .unwrap();
    tm.market.on_tick(2 * SECOND, b"tick-1").unwrap();
    let data = tm.market.market_data();
    assert_eq!(data.best_bid_price, 98);
    assert_eq!(data.best_offer_price, 100);
}

#[test]
fn pegged_buy_prices_off_the_mid() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("carol"), 10_000);

    // Buy mid of (98, 100) is 99; offset 1 puts the order at 98.
    let confirmation = tm
        .market
        .submit_order(
            pegged_order(id, "carol", Side::Buy, PeggedReference::Mid, 1, 5),
            b"cmd-4",
        )
        .unwrap();
    let placed = confirmation.order.unwrap();
    assert_eq!(placed.status, OrderStatus::Active);
    assert_eq!(placed.price, 98);
    assert!(placed.pegged.is_some());
}

#[test]
fn unpriceable_peg_parks_the_order() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("carol"), 10_000);

    // Best bid 98 minus 200 underflows: the order parks off the book.
    let confirmation = tm
        .market
        .submit_order(
            pegged_order(id, "carol", Side::Buy, PeggedReference::BestBid, 200, 5),
            b"cmd-4",
        )
        .unwrap();
    let parked = confirmation.order.unwrap();
    assert_eq!(parked.status, OrderStatus::Parked);
    assert_eq!(parked.price, 0);
    assert_eq!(tm.market.market_data().best_bid_price, 98, "book unchanged");
}

#[test]
fn invalid_peg_shapes_are_rejected() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("carol"), 10_000);

    // A buy pegged to the best ask would chase its own fills.
    let err = tm
        .market
        .submit_order(
            pegged_order(id, "carol", Side::Buy, PeggedReference::BestAsk, 1, 5),
            b"cmd-4",
        )
        .unwrap_err();
    assert!(matches!(err, ExecoreError::InvalidPeggedOrder { .. }));

    // Mid with a zero offset would sit exactly on the mid.
    assert!(tm
        .market
        .submit_order(
            pegged_order(id, "carol", Side::Sell, PeggedReference::Mid, 0, 5),
            b"cmd-5",
        )
        .is_err());
}

#[test]
fn pegged_orders_are_invisible_to_static_prices() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("carol"), 10_000);

    // A pegged bid inside the spread does not move the static best bid,
    // so later pegs still price off the plain orders.
    tm.market
        .submit_order(
            pegged_order(id, "carol", Side::Buy, PeggedReference::BestBid, 0, 5),
            b"cmd-4",
        )
        .unwrap();
    let data = tm.market.market_data();
    assert_eq!(data.best_bid_price, 98);
    assert_eq!(data.mid_price_buy, 99);
}

#[test]
fn price_auction_parks_and_restores_pegged_orders() {
    let id = market_id();
    let mut tm = test_market_with(
        MarketConfig::dummy(id),
        0,
        TestPriceMonitor::with_bounds(99, 105, SECOND),
        TestLiquidityMonitor::default(),
    );
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("carol"), 10_000);
    tm.ledger.deposit(&party("dave"), 100_000);

    let confirmation = tm
        .market
        .submit_order(
            pegged_order(id, "carol", Side::Buy, PeggedReference::Mid, 1, 5),
            b"cmd-4",
        )
        .unwrap();
    let pegged_id = confirmation.order.unwrap().id;

    // Dave's sell would hit the 98 bid, outside the [99, 105] band: the
    // market suspends into a price auction and the pegged order parks.
    tm.market
        .submit_order(order(id, "dave", Side::Sell, 80, 5), b"cmd-5")
        .unwrap();
    assert_eq!(tm.market.state(), MarketState::Suspended);
    assert_eq!(tm.market.trading_mode(), TradingMode::MonitoringAuction);
    let last = tm
        .events
        .orders()
        .into_iter()
        .filter(|o| o.id == pegged_id)
        .next_back()
        .unwrap();
    assert_eq!(last.status, OrderStatus::Parked);

    // Once the auction runs out it uncrosses — bounds only gate entry —
    // and the peg is repriced onto the refreshed book.
    tm.market.on_tick(4 * SECOND, b"tick-2").unwrap();
    assert_eq!(tm.market.state(), MarketState::Active);
    assert_eq!(tm.market.mark_price(), 89, "midpoint of 98 bid and 80 offer");
    let restored = tm
        .events
        .orders()
        .into_iter()
        .filter(|o| o.id == pegged_id)
        .next_back()
        .unwrap();
    assert_eq!(restored.status, OrderStatus::Active);
    assert_eq!(restored.price, 98, "repriced against the refreshed book");
}

#[test]
fn non_persistent_order_outside_bounds_is_rejected() {
    let id = market_id();
    let mut tm = test_market_with(
        MarketConfig::dummy(id),
        0,
        TestPriceMonitor::with_bounds(99, 105, SECOND),
        TestLiquidityMonitor::default(),
    );
    open_with_spread(&mut tm);
    tm.ledger.deposit(&party("dave"), 100_000);

    // An IOC that would trade at the 98 bid, below the band: no auction
    // is worth starting for an order that cannot rest, so it is refused.
    let mut ioc = order(id, "dave", Side::Sell, 80, 5);
    ioc.time_in_force = execore_types::TimeInForce::Ioc;
    assert!(matches!(
        tm.market.submit_order(ioc, b"cmd-4"),
        Err(ExecoreError::InvalidOrder { .. })
    ));
    assert_eq!(tm.market.state(), MarketState::Active, "no auction entered");
}
