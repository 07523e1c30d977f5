//! # execore-market
//!
//! **Deterministic per-market execution core.**
//!
//! One [`market::Market`] instance owns everything a single derivatives
//! market needs to process commands: order validation and submission,
//! amendment, cancellation, pegged-order repricing, auction entry and
//! exit, liquidity commitments, fee accrual and distribution, and
//! mark-to-market settlement with close-out of distressed parties. It has:
//!
//! - **Replay determinism**: no wall clock, no RNG; IDs derive from the
//!   command's block hash, all iteration orders are fixed
//! - **Pluggable collaborators**: the matching book, collateral ledger,
//!   risk model, and monitors sit behind traits ([`engines`])
//! - **Snapshot support**: the full market state serializes and hashes
//!   for cross-node state proofs ([`snapshot`])

pub mod auction;
pub mod engines;
pub mod equity_shares;
pub mod expiring_orders;
pub mod fee_splitter;
pub mod fees;
pub mod idgen;
pub mod liquidity;
pub mod market;
pub mod pegged_orders;
pub mod repricing;
pub mod snapshot;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use auction::AuctionState;
pub use engines::{
    Broker, CollateralLedger, LiquidityMonitor, MarginUpdate, MarketPosition, MatchingBook,
    PositionTracker, PriceMonitor, RiskEngine, RiskFactors, SettlementEngine,
    TargetStakeCalculator, Transfer, TransferKind,
};
pub use equity_shares::EquityShares;
pub use fee_splitter::FeeSplitter;
pub use fees::FeeEngine;
pub use idgen::IdGenerator;
pub use liquidity::LiquidityEngine;
pub use market::{Market, MarketCollaborators};
pub use snapshot::{MarketSnapshot, SNAPSHOT_VERSION};
