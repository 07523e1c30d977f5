//! # execore-types
//!
//! Shared types, errors, and configuration for the **execore** execution
//! core.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`MarketId`], [`PartyId`], [`OrderId`], [`TradeId`]
//! - **Order model**: [`Order`], [`Side`], [`OrderType`], [`TimeInForce`],
//!   [`OrderStatus`], [`PeggedOrder`], [`OrderAmendment`]
//! - **Trade model**: [`Trade`], [`TradeType`], [`Fee`]
//! - **Liquidity model**: [`LiquidityProvision`], [`LiquidityOrder`],
//!   [`LiquidityProvisionSubmission`]
//! - **Market model**: [`MarketState`], [`TradingMode`], [`AuctionTrigger`],
//!   [`MarketConfig`], [`MarketData`]
//! - **Events**: [`MarketEvent`]
//! - **Errors**: [`ExecoreError`] with `EC_ERR_` prefix codes, and
//!   [`RejectReason`] carried on rejected orders

pub mod error;
pub mod events;
pub mod ids;
pub mod liquidity;
pub mod market;
pub mod order;
pub mod time;
pub mod trade;

// Re-export all primary types at crate root for ergonomic imports:
//   use execore_types::{Order, Side, Trade, MarketConfig, ...};

pub use error::*;
pub use events::*;
pub use ids::*;
pub use liquidity::*;
pub use market::*;
pub use order::*;
pub use trade::*;

// Time helpers are accessed via `execore_types::time::format_nanos`
// (not re-exported to keep the root namespace to domain types).
