//! Error types for the execution core.
//!
//! All errors use the `EC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order validation / submission errors
//! - 2xx: Amendment and cancellation errors
//! - 3xx: Liquidity provision errors
//! - 4xx: Auction errors
//! - 5xx: Collateral / margin errors
//! - 6xx: Settlement and fee errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{MarketId, OrderId, PartyId};

/// Central error enum for all execution-core operations.
#[derive(Debug, Error)]
pub enum ExecoreError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The requested order was not found in any registry.
    #[error("EC_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order was submitted against the wrong market.
    #[error("EC_ERR_101: Order market {order_market} does not match market {market}")]
    InvalidMarketId {
        order_market: MarketId,
        market: MarketId,
    },

    /// The market is no longer accepting commands.
    #[error("EC_ERR_102: Market closed: {0}")]
    MarketClosed(MarketId),

    /// The order failed structural validation.
    #[error("EC_ERR_103: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// Network orders are created by the core only, never submitted.
    #[error("EC_ERR_104: Invalid order type: network orders cannot be submitted")]
    InvalidOrderType,

    /// GFN/IOC/FOK orders are not accepted while in auction.
    #[error("EC_ERR_105: Time in force {tif} not accepted during auction")]
    InvalidTimeInForceInAuction { tif: String },

    /// GFA orders are not accepted during continuous trading.
    #[error("EC_ERR_106: GFA order received during continuous trading")]
    GfaOrderDuringContinuousTrading,

    /// Expiry timestamp is before the creation timestamp.
    #[error("EC_ERR_107: Order expires_at {expires_at} precedes created_at {created_at}")]
    InvalidExpirationTime { expires_at: i64, created_at: i64 },

    /// Pegged order failed peg shape validation.
    #[error("EC_ERR_108: Invalid pegged order: {reason}")]
    InvalidPeggedOrder { reason: String },

    /// FOK/IOC remainder or book-side error while uncrossing.
    #[error("EC_ERR_109: Matching failed: {reason}")]
    MatchingFailed { reason: String },

    // =================================================================
    // Amendment / Cancellation Errors (2xx)
    // =================================================================
    /// The amendment carries no order ID or no changes.
    #[error("EC_ERR_200: Invalid amendment: {reason}")]
    InvalidAmendment { reason: String },

    /// A party may only amend or cancel its own orders.
    #[error("EC_ERR_201: Party {party} does not own order {order}")]
    OrderNotOwned { party: PartyId, order: OrderId },

    /// Amendments cannot add or remove a peg.
    #[error("EC_ERR_202: Cannot amend peg details on a non-pegged order")]
    CannotAmendPeggedFields,

    /// GTT orders must keep an expiry; GTC orders must not carry one.
    #[error("EC_ERR_203: Incompatible time in force and expiry in amendment")]
    IncompatibleTifExpiry,

    /// Orders owned by a liquidity commitment cannot be touched directly.
    #[error("EC_ERR_204: Order {0} belongs to a liquidity provision and cannot be edited")]
    EditNotAllowed(OrderId),

    // =================================================================
    // Liquidity Errors (3xx)
    // =================================================================
    /// The commitment amount must be positive.
    #[error("EC_ERR_300: Invalid liquidity commitment: {reason}")]
    InvalidLiquidityCommitment { reason: String },

    /// The party has no commitment on this market.
    #[error("EC_ERR_301: No liquidity provision for party {0}")]
    LiquidityProvisionNotFound(PartyId),

    /// Reducing the commitment would leave the market below target stake.
    #[error("EC_ERR_302: Commitment reduction below target stake not allowed")]
    CommitmentReductionNotAllowed,

    // =================================================================
    // Auction Errors (4xx)
    // =================================================================
    /// The requested auction transition is not valid from the current state.
    #[error("EC_ERR_400: Invalid auction transition: {reason}")]
    InvalidAuctionTransition { reason: String },

    /// Attempted to leave an auction that cannot yet be left.
    #[error("EC_ERR_401: Auction cannot be left: {reason}")]
    CannotLeaveAuction { reason: String },

    /// Only a Proposed market can be rejected.
    #[error("EC_ERR_402: Cannot reject market in state {0}")]
    CannotRejectMarket(String),

    // =================================================================
    // Collateral / Margin Errors (5xx)
    // =================================================================
    /// The party has no margin account on this market.
    #[error("EC_ERR_500: Missing margin account for party {0}")]
    MissingMarginAccount(PartyId),

    /// The party has no general account in the settlement asset.
    #[error("EC_ERR_501: Missing general account for party {0}")]
    MissingGeneralAccount(PartyId),

    /// The risk engine rejected the order for insufficient margin.
    #[error("EC_ERR_502: Margin check failed for party {0}")]
    MarginCheckFailed(PartyId),

    /// A collateral transfer could not be completed.
    #[error("EC_ERR_503: Collateral transfer failed: {reason}")]
    TransferFailed { reason: String },

    // =================================================================
    // Settlement / Fee Errors (6xx)
    // =================================================================
    /// Mark-to-market settlement failed.
    #[error("EC_ERR_600: Settlement failed: {reason}")]
    SettlementFailed { reason: String },

    /// Fee calculation or transfer failed.
    #[error("EC_ERR_601: Fee error: {reason}")]
    FeeError { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("EC_ERR_900: Internal error: {0}")]
    Internal(String),

    /// The fee-splitter window clock moved before its window start.
    #[error("EC_ERR_901: Time moved backwards: current {current}, window start {window_start}")]
    TimeBackwards { current: i64, window_start: i64 },

    /// A party appears in a registry but not in the equity-share ledger.
    #[error("EC_ERR_902: Unknown liquidity provider: {0}")]
    UnknownLiquidityProvider(PartyId),
}

/// Reason attached to orders that are rejected or stopped, mirrored onto
/// the order itself so the event stream is self-describing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum RejectReason {
    InvalidMarketId,
    MarketClosed,
    InvalidOrderType,
    InvalidTimeInForce,
    GfaOrderDuringContinuousTrading,
    GfnOrderDuringAuction,
    InvalidExpirationTime,
    InvalidPeggedOrder,
    MarginCheckFailed,
    MissingGeneralAccount,
    SelfTrading,
    FokNotFilled,
    CouldNotRepricePeggedOrder,
    ClosedOut,
    InternalError,
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ExecoreError>;

impl ExecoreError {
    /// Maps a rejection-class error to the reason carried on the order.
    /// Errors that do not reject an order map to `InternalError`.
    #[must_use]
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            Self::InvalidMarketId { .. } => RejectReason::InvalidMarketId,
            Self::MarketClosed(_) => RejectReason::MarketClosed,
            Self::InvalidOrderType => RejectReason::InvalidOrderType,
            Self::InvalidTimeInForceInAuction { .. } => RejectReason::InvalidTimeInForce,
            Self::GfaOrderDuringContinuousTrading => {
                RejectReason::GfaOrderDuringContinuousTrading
            }
            Self::InvalidExpirationTime { .. } => RejectReason::InvalidExpirationTime,
            Self::InvalidPeggedOrder { .. } => RejectReason::InvalidPeggedOrder,
            Self::MarginCheckFailed(_) => RejectReason::MarginCheckFailed,
            Self::MissingGeneralAccount(_) => RejectReason::MissingGeneralAccount,
            _ => RejectReason::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = ExecoreError::OrderNotFound(OrderId::from_bytes([7u8; 16]));
        let msg = format!("{err}");
        assert!(msg.starts_with("EC_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn reject_reason_mapping() {
        let err = ExecoreError::GfaOrderDuringContinuousTrading;
        assert_eq!(
            err.reject_reason(),
            RejectReason::GfaOrderDuringContinuousTrading
        );
        let err = ExecoreError::Internal("boom".into());
        assert_eq!(err.reject_reason(), RejectReason::InternalError);
    }
}
