//! Liquidity commitment book: provisions, derived order sizing, and the
//! committed-fee auction.
//!
//! A provider commits stake and a two-sided shape of pegged levels. The
//! engine turns each shape level into a concrete order of just enough
//! volume for the level's slice of the obligation — volume rounds up, so
//! the deployed notional never falls short of the commitment.

use std::collections::BTreeMap;

use execore_types::{
    ExecoreError, LiquidityOrder, LiquidityProvision, LiquidityProvisionStatus,
    LiquidityProvisionSubmission, OrderId, PartyId, PeggedOrder, PeggedReference, Result, Side,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::repricing::price_for_peg;

/// A fully priced and sized order derived from one shape level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidityOrderSpec {
    pub side: Side,
    pub price: u64,
    pub size: u64,
    pub reference: PeggedReference,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidityEngine {
    provisions: BTreeMap<PartyId, LiquidityProvision>,
    /// Order IDs currently deployed per provider.
    orders: BTreeMap<PartyId, Vec<OrderId>>,
}

impl LiquidityEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a party's commitment. Validation failures
    /// leave no side effects.
    pub fn submit(
        &mut self,
        submission: LiquidityProvisionSubmission,
        party: PartyId,
        now: i64,
    ) -> Result<LiquidityProvision> {
        if let Some(reason) = submission.validate() {
            return Err(ExecoreError::InvalidLiquidityCommitment {
                reason: reason.to_string(),
            });
        }
        let (version, created_at) = self
            .provisions
            .get(&party)
            .map_or((1, now), |existing| (existing.version + 1, existing.created_at));
        let provision = LiquidityProvision {
            market: submission.market,
            party: party.clone(),
            commitment_amount: submission.commitment_amount,
            fee: submission.fee,
            buys: submission.buys,
            sells: submission.sells,
            status: LiquidityProvisionStatus::Pending,
            created_at,
            updated_at: now,
            version,
        };
        self.provisions.insert(party, provision.clone());
        Ok(provision)
    }

    /// Removes a party's commitment on their own request.
    pub fn cancel(&mut self, party: &PartyId, now: i64) -> Result<LiquidityProvision> {
        self.remove(party, LiquidityProvisionStatus::Cancelled, now)
            .ok_or_else(|| ExecoreError::LiquidityProvisionNotFound(party.clone()))
    }

    /// Force-removes a commitment as a close-out side effect.
    pub fn stop(&mut self, party: &PartyId, now: i64) -> Option<LiquidityProvision> {
        self.remove(party, LiquidityProvisionStatus::Stopped, now)
    }

    /// Drains every commitment when the market proposal is declined.
    pub fn reject_all(&mut self, now: i64) -> Vec<LiquidityProvision> {
        self.orders.clear();
        std::mem::take(&mut self.provisions)
            .into_values()
            .map(|mut provision| {
                provision.status = LiquidityProvisionStatus::Rejected;
                provision.updated_at = now;
                provision
            })
            .collect()
    }

    fn remove(
        &mut self,
        party: &PartyId,
        status: LiquidityProvisionStatus,
        now: i64,
    ) -> Option<LiquidityProvision> {
        let mut provision = self.provisions.remove(party)?;
        self.orders.remove(party);
        provision.status = status;
        provision.updated_at = now;
        Some(provision)
    }

    pub fn set_status(&mut self, party: &PartyId, status: LiquidityProvisionStatus, now: i64) {
        if let Some(provision) = self.provisions.get_mut(party) {
            provision.status = status;
            provision.updated_at = now;
        }
    }

    #[must_use]
    pub fn provision(&self, party: &PartyId) -> Option<&LiquidityProvision> {
        self.provisions.get(party)
    }

    #[must_use]
    pub fn is_liquidity_provider(&self, party: &PartyId) -> bool {
        self.provisions.contains_key(party)
    }

    /// Providers in deterministic order.
    pub fn providers(&self) -> impl Iterator<Item = &LiquidityProvision> {
        self.provisions.values()
    }

    /// Sum of all commitments, cancelled ones excluded by construction.
    #[must_use]
    pub fn total_stake(&self) -> Decimal {
        self.provisions
            .values()
            .map(|p| Decimal::from(p.commitment_amount))
            .sum()
    }

    /// The committed-fee auction: walk providers from cheapest fee up,
    /// accumulating stake; the provider whose stake carries the cumulative
    /// total past the target sets the market's liquidity fee. An
    /// undersupplied market pays the most expensive committed fee.
    #[must_use]
    pub fn fee_for_target(&self, target_stake: Decimal) -> Decimal {
        let mut by_fee: Vec<&LiquidityProvision> = self.provisions.values().collect();
        if by_fee.is_empty() {
            return Decimal::ZERO;
        }
        by_fee.sort_by(|a, b| a.fee.cmp(&b.fee).then_with(|| a.party.cmp(&b.party)));
        let mut cumulative = Decimal::ZERO;
        for provision in &by_fee {
            cumulative += Decimal::from(provision.commitment_amount);
            if cumulative >= target_stake {
                return provision.fee;
            }
        }
        by_fee[by_fee.len() - 1].fee
    }

    // -- deployed-order bookkeeping -------------------------------------

    pub fn record_order(&mut self, party: &PartyId, id: OrderId) {
        self.orders.entry(party.clone()).or_default().push(id);
    }

    /// Forgets a party's deployed orders, returning the IDs so the caller
    /// can pull them from the book.
    pub fn take_orders(&mut self, party: &PartyId) -> Vec<OrderId> {
        self.orders.remove(party).unwrap_or_default()
    }

    #[must_use]
    pub fn party_orders(&self, party: &PartyId) -> &[OrderId] {
        self.orders.get(party).map_or(&[], Vec::as_slice)
    }

    /// Whether an order belongs to any provider's deployed shape. Such
    /// orders are never directly amendable or cancellable.
    #[must_use]
    pub fn is_liquidity_order(&self, id: OrderId) -> bool {
        self.orders.values().any(|ids| ids.contains(&id))
    }
}

/// Sizes one side of a commitment shape against resolved level prices:
/// `volume = ceil(obligation · proportion / (Σ proportions · price))`.
fn size_side(
    obligation: Decimal,
    side: Side,
    shape: &[LiquidityOrder],
    best_bid: Option<u64>,
    best_ask: Option<u64>,
) -> Option<Vec<LiquidityOrderSpec>> {
    let total_proportion: Decimal = shape.iter().map(|lo| Decimal::from(lo.proportion)).sum();
    let mut specs = Vec::with_capacity(shape.len());
    for level in shape {
        let pegged = PeggedOrder {
            reference: level.reference,
            offset: level.offset,
        };
        let price = price_for_peg(&pegged, side, best_bid, best_ask)?;
        let volume = (obligation * Decimal::from(level.proportion)
            / (total_proportion * Decimal::from(price)))
        .ceil()
        .to_u64()?;
        specs.push(LiquidityOrderSpec {
            side,
            price,
            size: volume,
            reference: level.reference,
            offset: level.offset,
        });
    }
    Some(specs)
}

/// Derives the full set of orders implementing a commitment against the
/// current best static prices. `None` when any level's peg cannot be
/// resolved — the commitment then stays undeployed, never half-deployed.
#[must_use]
pub fn provision_orders(
    provision: &LiquidityProvision,
    best_bid: Option<u64>,
    best_ask: Option<u64>,
) -> Option<Vec<LiquidityOrderSpec>> {
    let obligation = Decimal::from(provision.commitment_amount);
    let mut specs = size_side(obligation, Side::Buy, &provision.buys, best_bid, best_ask)?;
    specs.extend(size_side(
        obligation,
        Side::Sell,
        &provision.sells,
        best_bid,
        best_ask,
    )?);
    Some(specs)
}

#[cfg(test)]
mod tests {
    use execore_types::MarketId;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn market() -> MarketId {
        MarketId::from_bytes([1u8; 16])
    }

    fn submission(amount: u64, fee: &str) -> LiquidityProvisionSubmission {
        LiquidityProvisionSubmission {
            market: market(),
            commitment_amount: amount,
            fee: dec(fee),
            buys: vec![LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: 1,
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
    fn submit_then_amend_bumps_version() {
        let mut engine = LiquidityEngine::new();
        let party = PartyId::new("lp");
        let first = engine.submit(submission(1000, "0.001"), party.clone(), 10).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.status, LiquidityProvisionStatus::Pending);

        let second = engine.submit(submission(2000, "0.002"), party.clone(), 20).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, 10);
        assert_eq!(second.updated_at, 20);
        assert_eq!(engine.total_stake(), dec("2000"));
    }

    #[test]
    fn invalid_submission_has_no_side_effects() {
        let mut engine = LiquidityEngine::new();
        let mut bad = submission(0, "0.001");
        bad.commitment_amount = 0;
        assert!(engine.submit(bad, PartyId::new("lp"), 0).is_err());
        assert!(!engine.is_liquidity_provider(&PartyId::new("lp")));
        assert_eq!(engine.total_stake(), Decimal::ZERO);
    }

    #[test]
    fn reject_all_drains_every_provision() {
        let mut engine = LiquidityEngine::new();
        engine.submit(submission(1000, "0.001"), PartyId::new("a"), 0).unwrap();
        engine.submit(submission(2000, "0.002"), PartyId::new("b"), 0).unwrap();

        let rejected = engine.reject_all(5);
        assert_eq!(rejected.len(), 2);
        assert!(rejected
            .iter()
            .all(|p| p.status == LiquidityProvisionStatus::Rejected && p.updated_at == 5));
        assert_eq!(engine.total_stake(), Decimal::ZERO);
        assert!(!engine.is_liquidity_provider(&PartyId::new("a")));
    }

    #[test]
    fn fee_auction_picks_marginal_provider() {
        let mut engine = LiquidityEngine::new();
        engine.submit(submission(1000, "0.001"), PartyId::new("cheap"), 0).unwrap();
        engine.submit(submission(1000, "0.005"), PartyId::new("mid"), 0).unwrap();
        engine.submit(submission(1000, "0.009"), PartyId::new("dear"), 0).unwrap();

        // Cheap alone covers 800.
        assert_eq!(engine.fee_for_target(dec("800")), dec("0.001"));
        // 1500 needs cheap + mid.
        assert_eq!(engine.fee_for_target(dec("1500")), dec("0.005"));
        // Undersupplied: highest committed fee.
        assert_eq!(engine.fee_for_target(dec("99999")), dec("0.009"));
        // No providers at all.
        assert_eq!(LiquidityEngine::new().fee_for_target(dec("1")), Decimal::ZERO);
    }

    #[test]
    fn sizing_ceils_obligation_over_price() {
        let mut provision = LiquidityProvision {
            market: market(),
            party: PartyId::new("lp"),
            commitment_amount: 3_120_580,
            fee: dec("0.001"),
            buys: vec![LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: 1,
                proportion: 1,
            }],
            sells: vec![LiquidityOrder {
                reference: PeggedReference::BestAsk,
                offset: 1,
                proportion: 1,
            }],
            status: LiquidityProvisionStatus::Pending,
            created_at: 0,
            updated_at: 0,
            version: 1,
        };
        // Best bid 3748, best ask 3749: levels price at 3747 and 3750,
        // both sizing to ceil(3120580 / price) = 833.
        let specs = provision_orders(&provision, Some(3748), Some(3749)).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].side, Side::Buy);
        assert_eq!(specs[0].price, 3747);
        assert_eq!(specs[0].size, 833);
        assert_eq!(specs[1].side, Side::Sell);
        assert_eq!(specs[1].price, 3750);
        assert_eq!(specs[1].size, 833);

        // Proportions split the obligation across levels.
        provision.buys = vec![
            LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: 1,
                proportion: 3,
            },
            LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: 2,
                proportion: 1,
            },
        ];
        let specs = provision_orders(&provision, Some(3748), Some(3749)).unwrap();
        // ceil(3120580·3 / (4·3747)) = 625, ceil(3120580 / (4·3746)) = 209
        assert_eq!(specs[0].size, 625);
        assert_eq!(specs[1].size, 209);
    }

    #[test]
    fn unresolvable_peg_leaves_commitment_undeployed() {
        let provision = LiquidityProvision {
            market: market(),
            party: PartyId::new("lp"),
            commitment_amount: 1000,
            fee: dec("0.001"),
            buys: vec![LiquidityOrder {
                reference: PeggedReference::BestBid,
                offset: 1,
                proportion: 1,
            }],
            sells: vec![LiquidityOrder {
                reference: PeggedReference::BestAsk,
                offset: 1,
                proportion: 1,
            }],
            status: LiquidityProvisionStatus::Pending,
            created_at: 0,
            updated_at: 0,
            version: 1,
        };
        assert!(provision_orders(&provision, Some(100), None).is_none());
    }

    #[test]
    fn lp_order_bookkeeping() {
        let mut engine = LiquidityEngine::new();
        let party = PartyId::new("lp");
        engine.submit(submission(1000, "0.001"), party.clone(), 0).unwrap();
        let id = OrderId::from_bytes([9u8; 16]);
        engine.record_order(&party, id);
        assert!(engine.is_liquidity_order(id));
        assert_eq!(engine.take_orders(&party), vec![id]);
        assert!(!engine.is_liquidity_order(id));
    }
}
