//! Order amendment semantics: price changes resubmit and lose priority,
//! size decreases stay in place, margin failures roll back cleanly, and
//! the validation rules around TIF and expiry hold.

use execore_market::testkit::{test_market, TestMarket};
use execore_types::{
    ExecoreError, MarketConfig, MarketId, Order, OrderAmendment, OrderStatus, PartyId, Side,
    TimeInForce,
};

const SECOND: i64 = 1_000_000_000;

fn market_id() -> MarketId {
    MarketId::from_bytes([11u8; 16])
}

fn order(market: MarketId, party: &str, side: Side, price: u64, size: u64) -> Order {
    Order::dummy_limit(market, party, side, price, size)
}

fn party(name: &str) -> PartyId {
    PartyId::new(name)
}

fn amend(order_id: execore_types::OrderId) -> OrderAmendment {
    OrderAmendment {
        order_id: Some(order_id),
        ..OrderAmendment::default()
    }
}

/// Opens at 100 and leaves the book empty either side.
fn open_market(tm: &mut TestMarket) {
    let id = tm.market.id();
    tm.ledger.deposit(&party("alice"), 100_000);
    tm.ledger.deposit(&party("bob"), 100_000);
    tm.market.start_opening_auction(0).unwrap();
    tm.market
        .submit_order(order(id, "alice", Side::Buy, 100, 10), b"cmd-1")
        .unwrap();
    tm.market
        .submit_order(order(id, "bob", Side::Sell, 100, 10), b"cmd-2")
        .unwrap();
    tm.market.on_tick(2 * SECOND, b"tick-1").unwrap();
}

/// Submits a resting 10-lot bid at 90 for `name` and returns its id.
fn resting_bid(tm: &mut TestMarket, name: &str, block: &[u8]) -> execore_types::OrderId {
    let id = tm.market.id();
    let confirmation = tm
        .market
        .submit_order(order(id, name, Side::Buy, 90, 10), block)
        .unwrap();
    confirmation.order.unwrap().id
}

#[test]
fn price_amendment_resubmits_with_next_version() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");

    let mut amendment = amend(order_id);
    amendment.price = Some(95);
    let confirmation = tm
        .market
        .amend_order(&amendment, &party("pete"), b"cmd-4")
        .unwrap();

    let amended = confirmation.order.unwrap();
    assert_eq!(amended.price, 95);
    assert_eq!(amended.version, 2);
    assert_eq!(amended.status, OrderStatus::Active);
}

#[test]
fn size_decrease_amends_in_place() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");

    let mut amendment = amend(order_id);
    amendment.size_delta = -4;
    let confirmation = tm
        .market
        .amend_order(&amendment, &party("pete"), b"cmd-4")
        .unwrap();

    let amended = confirmation.order.unwrap();
    assert_eq!(amended.remaining, 6);
    assert_eq!(amended.size, 6);
    assert_eq!(amended.version, 2);
}

#[test]
fn size_amended_to_zero_cancels() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");

    let mut amendment = amend(order_id);
    amendment.size_delta = -10;
    let confirmation = tm
        .market
        .amend_order(&amendment, &party("pete"), b"cmd-4")
        .unwrap();
    assert_eq!(confirmation.order.unwrap().status, OrderStatus::Cancelled);
}

#[test]
fn failed_margin_check_leaves_order_untouched() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    // Exactly the margin for a 10-lot at mark 100 and nothing more.
    let quentin = party("quentin");
    tm.ledger.deposit(&quentin, 100);
    let order_id = resting_bid(&mut tm, "quentin", b"cmd-3");
    assert_eq!(tm.ledger.general_balance(&quentin), 0);

    let mut amendment = amend(order_id);
    amendment.price = Some(95);
    let err = tm
        .market
        .amend_order(&amendment, &quentin, b"cmd-4")
        .unwrap_err();
    assert!(matches!(err, ExecoreError::MarginCheckFailed(_)));

    // The original order is intact on the book and cancels cleanly,
    // returning the full margin.
    let cancelled = tm.market.cancel_order(&quentin, order_id).unwrap();
    assert_eq!(cancelled.order.price, 90);
    assert_eq!(cancelled.order.version, 1);
    assert_eq!(tm.ledger.general_balance(&quentin), 100);
}

#[test]
fn amending_someone_elses_order_is_rejected() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");

    let mut amendment = amend(order_id);
    amendment.size_delta = -1;
    assert!(matches!(
        tm.market.amend_order(&amendment, &party("bob"), b"cmd-4"),
        Err(ExecoreError::OrderNotOwned { .. })
    ));
}

#[test]
fn expiry_amended_into_the_past_expires_now() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);

    let mut gtt = order(id, "pete", Side::Buy, 90, 10);
    gtt.time_in_force = TimeInForce::Gtt;
    gtt.expires_at = 100 * SECOND;
    let confirmation = tm.market.submit_order(gtt, b"cmd-3").unwrap();
    let order_id = confirmation.order.unwrap().id;

    let mut amendment = amend(order_id);
    amendment.expires_at = Some(SECOND);
    let confirmation = tm
        .market
        .amend_order(&amendment, &party("pete"), b"cmd-4")
        .unwrap();
    assert_eq!(confirmation.order.unwrap().status, OrderStatus::Expired);
}

#[test]
fn tif_and_expiry_validation() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");
    let pete = party("pete");

    // Expiry on a GTC order.
    let mut amendment = amend(order_id);
    amendment.expires_at = Some(10 * SECOND);
    assert!(matches!(
        tm.market.amend_order(&amendment, &pete, b"cmd-4"),
        Err(ExecoreError::IncompatibleTifExpiry)
    ));

    // GTT without an expiry.
    let mut amendment = amend(order_id);
    amendment.time_in_force = Some(TimeInForce::Gtt);
    assert!(matches!(
        tm.market.amend_order(&amendment, &pete, b"cmd-5"),
        Err(ExecoreError::IncompatibleTifExpiry)
    ));

    // Amending into GFN is never allowed.
    let mut amendment = amend(order_id);
    amendment.time_in_force = Some(TimeInForce::Gfn);
    assert!(matches!(
        tm.market.amend_order(&amendment, &pete, b"cmd-6"),
        Err(ExecoreError::InvalidAmendment { .. })
    ));

    // Pegged fields on a plain limit order.
    let mut amendment = amend(order_id);
    amendment.pegged_offset = Some(2);
    assert!(matches!(
        tm.market.amend_order(&amendment, &pete, b"cmd-7"),
        Err(ExecoreError::CannotAmendPeggedFields)
    ));
}

#[test]
fn amended_price_can_cross_and_trade() {
    let id = market_id();
    let mut tm = test_market(MarketConfig::dummy(id), 0);
    open_market(&mut tm);
    tm.ledger.deposit(&party("pete"), 10_000);
    let order_id = resting_bid(&mut tm, "pete", b"cmd-3");

    // An offer arrives above pete's bid; amending the bid up to it trades.
    tm.market
        .submit_order(order(id, "bob", Side::Sell, 100, 10), b"cmd-4")
        .unwrap();
    let mut amendment = amend(order_id);
    amendment.price = Some(100);
    let confirmation = tm
        .market
        .amend_order(&amendment, &party("pete"), b"cmd-5")
        .unwrap();

    assert_eq!(confirmation.trades.len(), 1);
    assert_eq!(confirmation.trades[0].price, 100);
    assert_eq!(confirmation.trades[0].size, 10);
    assert_eq!(confirmation.order.unwrap().status, OrderStatus::Filled);
}
