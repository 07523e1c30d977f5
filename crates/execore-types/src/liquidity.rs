//! Liquidity commitment types.
//!
//! A liquidity provision is a bond-backed obligation to keep pegged volume
//! on both sides of the book, shaped by per-level proportions. The core
//! derives actual orders from these shapes; providers never place the
//! derived orders directly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MarketId, PartyId, PeggedReference};

/// One level of a commitment shape: a peg plus the share of the obligation
/// that should rest at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityOrder {
    pub reference: PeggedReference,
    /// Signed offset from the reference price, in market precision.
    pub offset: i64,
    /// Relative weight of this level within its side.
    pub proportion: u32,
}

/// Lifecycle of a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquidityProvisionStatus {
    /// Accepted but orders not yet deployed (e.g. submitted during auction).
    Pending,
    Active,
    Cancelled,
    /// Force-removed by the core, e.g. when the provider is closed out.
    Stopped,
    Rejected,
}

/// A party's liquidity commitment on a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvision {
    pub market: MarketId,
    pub party: PartyId,
    /// Bond-backed stake in the settlement asset, market precision.
    pub commitment_amount: u64,
    /// Fee factor bid by this provider, used in fee auction ordering.
    #[serde(with = "rust_decimal::serde::str")]
    pub fee: Decimal,
    pub buys: Vec<LiquidityOrder>,
    pub sells: Vec<LiquidityOrder>,
    pub status: LiquidityProvisionStatus,
    /// Nanoseconds since epoch.
    pub created_at: i64,
    pub updated_at: i64,
    /// Incremented on every amendment to the commitment.
    pub version: u32,
}

/// A commitment as submitted by a party, before the core fills in
/// bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvisionSubmission {
    pub market: MarketId,
    pub commitment_amount: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub fee: Decimal,
    pub buys: Vec<LiquidityOrder>,
    pub sells: Vec<LiquidityOrder>,
}

impl LiquidityProvisionSubmission {
    /// Structural validation: positive commitment, non-negative fee, and
    /// both shapes present with positive proportions.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.commitment_amount == 0 {
            return Some("commitment amount must be positive");
        }
        if self.fee.is_sign_negative() {
            return Some("fee must not be negative");
        }
        if self.buys.is_empty() || self.sells.is_empty() {
            return Some("both buy and sell shapes are required");
        }
        if self
            .buys
            .iter()
            .chain(self.sells.iter())
            .any(|lo| lo.proportion == 0)
        {
            return Some("shape proportions must be positive");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> LiquidityProvisionSubmission {
        LiquidityProvisionSubmission {
            market: MarketId::from_bytes([1u8; 16]),
            commitment_amount: 1000,
            fee: Decimal::new(1, 3),
            buys: vec![LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: -1,
                proportion: 1,
            }],
            sells: vec![LiquidityOrder {
                reference: PeggedReference::BestAsk,
                offset: 1,
                proportion: 1,
            }],
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert_eq!(submission().validate(), None);
    }

    #[test]
    fn zero_commitment_rejected() {
        let mut sub = submission();
        sub.commitment_amount = 0;
        assert!(sub.validate().is_some());
    }

    #[test]
    fn empty_shape_rejected() {
        let mut sub = submission();
        sub.sells.clear();
        assert!(sub.validate().is_some());
    }

    #[test]
    fn zero_proportion_rejected() {
        let mut sub = submission();
        sub.buys[0].proportion = 0;
        assert!(sub.validate().is_some());
    }
}
