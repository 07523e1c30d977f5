//! Pegged-order price resolution.
//!
//! A peg's offset is a distance: buys price away from the market by
//! subtracting it, sells by adding it. The two mid references round in
//! opposite directions so a zero-offset buy mid never crosses a
//! zero-offset sell mid.

use execore_types::{
    ExecoreError, Order, OrderType, PeggedOrder, PeggedReference, Result, Side, TimeInForce,
};

/// Mid price as seen from the buy side: `(bid + ask + 1) / 2`.
#[must_use]
pub fn static_mid_price_buy(best_bid: u64, best_ask: u64) -> u64 {
    // midpoint rounds down; add the carry back when the sum is odd so
    // the buy side rounds up without overflowing the sum.
    u64::midpoint(best_bid, best_ask) + ((best_bid ^ best_ask) & 1)
}

/// Mid price as seen from the sell side: `(bid + ask) / 2`.
#[must_use]
pub fn static_mid_price_sell(best_bid: u64, best_ask: u64) -> u64 {
    u64::midpoint(best_bid, best_ask)
}

/// Resolves a peg against the current best static prices. `None` means
/// the order must be parked: either the needed reference is unavailable
/// or the computed price would not be positive. Never an error.
#[must_use]
pub fn price_for_peg(
    pegged: &PeggedOrder,
    side: Side,
    best_bid: Option<u64>,
    best_ask: Option<u64>,
) -> Option<u64> {
    let reference_price = match pegged.reference {
        PeggedReference::BestBid => best_bid?,
        PeggedReference::BestAsk => best_ask?,
        PeggedReference::Mid => {
            let (bid, ask) = (best_bid?, best_ask?);
            match side {
                Side::Buy => static_mid_price_buy(bid, ask),
                Side::Sell => static_mid_price_sell(bid, ask),
            }
        }
    };
    let offset = u64::try_from(pegged.offset).ok()?;
    match side {
        Side::Buy => {
            let price = reference_price.checked_sub(offset)?;
            (price > 0).then_some(price)
        }
        Side::Sell => reference_price.checked_add(offset),
    }
}

/// Peg shape validation at submission time: the reference must be
/// compatible with the side, Mid requires a non-zero offset, and offsets
/// are distances so they cannot be negative.
pub fn validate_peg(order: &Order) -> Result<()> {
    let Some(pegged) = &order.pegged else {
        return Ok(());
    };
    let reject = |reason: &str| {
        Err(ExecoreError::InvalidPeggedOrder {
            reason: reason.to_string(),
        })
    };
    if order.order_type != OrderType::Limit {
        return reject("only limit orders can be pegged");
    }
    if !matches!(
        order.time_in_force,
        TimeInForce::Gtc | TimeInForce::Gtt | TimeInForce::Gfn
    ) {
        return reject("pegged orders must be GTC, GTT or GFN");
    }
    if pegged.offset < 0 {
        return reject("offset cannot be negative");
    }
    match (order.side, pegged.reference) {
        (Side::Buy, PeggedReference::BestAsk) => reject("buy order cannot peg to best ask"),
        (Side::Sell, PeggedReference::BestBid) => reject("sell order cannot peg to best bid"),
        (_, PeggedReference::Mid) if pegged.offset == 0 => {
            reject("mid reference requires a non-zero offset")
        }
        _ => Ok(()),
    }
}
