//! Equity-like share accounting for liquidity providers.
//!
//! Each provider's claim on LP fee revenue is tracked as a *virtual* stake
//! that grows with the market-value-proxy, floored at the physical stake.
//! The average entry valuation records the total virtual stake at the
//! moment each unit of stake was committed, so late joiners of a grown
//! market earn proportionally less than early ones.
//!
//! All arithmetic is `rust_decimal`; parties are kept in a `BTreeMap` so
//! iteration (and therefore rounding) order is identical on every node.

use std::collections::{BTreeMap, BTreeSet};

use execore_types::{ExecoreError, PartyId, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-provider ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpRecord {
    /// Committed (physical) stake.
    pub stake: Decimal,
    /// Growth-adjusted stake; never below `stake`.
    pub v_stake: Decimal,
    /// Average total virtual stake at entry, weighted per unit committed.
    pub avg: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityShares {
    mvp: Decimal,
    opening_auction_ended: bool,
    lps: BTreeMap<PartyId, LpRecord>,
    total_v_stake: Decimal,
    total_p_stake: Decimal,
}

impl EquityShares {
    #[must_use]
    pub fn new(mvp: Decimal) -> Self {
        Self {
            mvp,
            opening_auction_ended: false,
            lps: BTreeMap::new(),
            total_v_stake: Decimal::ZERO,
            total_p_stake: Decimal::ZERO,
        }
    }

    /// Marks the one-time end of the opening auction, after which
    /// market-value-proxy updates drive virtual-stake growth.
    pub fn opening_auction_ended(&mut self) {
        self.opening_auction_ended = true;
    }

    /// Feeds a new market-value-proxy average. The adjustment ratio
    /// `r = (new − old) / old` (zero while `old` is zero) advances every
    /// virtual stake to `max(stake, v_stake · (1 + r))`.
    pub fn avg_trade_value(&mut self, avg: Decimal) {
        if self.opening_auction_ended && !self.mvp.is_zero() {
            let r = (avg - self.mvp) / self.mvp;
            let factor = Decimal::ONE + r;
            self.total_v_stake = Decimal::ZERO;
            for record in self.lps.values_mut() {
                record.v_stake = record.stake.max(record.v_stake * factor);
                self.total_v_stake += record.v_stake;
            }
        }
        self.mvp = avg;
    }

    /// Sets a party's physical stake, creating the record on first
    /// non-zero stake and deleting it when stake returns to zero.
    pub fn set_party_stake(&mut self, party: PartyId, new_stake: u64) {
        let new_stake = Decimal::from(new_stake);
        if new_stake.is_zero() {
            if let Some(record) = self.lps.remove(&party) {
                self.total_v_stake -= record.v_stake;
                self.total_p_stake -= record.stake;
            }
            return;
        }

        match self.lps.get_mut(&party) {
            None => {
                // New provider enters at the post-commit total valuation.
                self.total_v_stake += new_stake;
                self.total_p_stake += new_stake;
                self.lps.insert(
                    party,
                    LpRecord {
                        stake: new_stake,
                        v_stake: new_stake,
                        avg: self.total_v_stake,
                    },
                );
            }
            Some(record) if new_stake > record.stake => {
                let delta = new_stake - record.stake;
                self.total_v_stake += delta;
                self.total_p_stake += delta;
                // Blend the entry valuation toward the post-commit total:
                // avg' = (avg·v + T·Δ) / (v + Δ)
                record.avg = (record.avg * record.v_stake + self.total_v_stake * delta)
                    / (record.v_stake + delta);
                record.v_stake += delta;
                record.stake = new_stake;
            }
            Some(record) if new_stake < record.stake => {
                // Decreases scale virtual stake pro-rata and keep avg.
                let ratio = new_stake / record.stake;
                let new_v = record.v_stake * ratio;
                self.total_v_stake -= record.v_stake - new_v;
                self.total_p_stake -= record.stake - new_stake;
                record.v_stake = new_v;
                record.stake = new_stake;
            }
            Some(_) => {}
        }
    }

    /// The recorded average entry valuation; zero for unknown parties.
    #[must_use]
    pub fn avg_entry_valuation(&self, party: &PartyId) -> Decimal {
        self.lps.get(party).map_or(Decimal::ZERO, |r| r.avg)
    }

    /// A party's share of total virtual stake. Unknown parties are a
    /// caller bug surfaced as a typed error; callers must check
    /// membership first.
    pub fn equity(&self, party: &PartyId) -> Result<Decimal> {
        let record = self
            .lps
            .get(party)
            .ok_or_else(|| ExecoreError::UnknownLiquidityProvider(party.clone()))?;
        if self.total_v_stake.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok(record.v_stake / self.total_v_stake)
    }

    #[must_use]
    pub fn is_lp(&self, party: &PartyId) -> bool {
        self.lps.contains_key(party)
    }

    /// Shares for every party not in `except`, renormalised over the
    /// remaining virtual stake. Totals are only deducted transiently.
    #[must_use]
    pub fn shares_except(&self, except: &BTreeSet<PartyId>) -> BTreeMap<PartyId, Decimal> {
        let excluded: Decimal = except
            .iter()
            .filter_map(|p| self.lps.get(p))
            .map(|r| r.v_stake)
            .sum();
        let total = self.total_v_stake - excluded;
        let mut shares = BTreeMap::new();
        if total.is_zero() {
            return shares;
        }
        for (party, record) in &self.lps {
            if except.contains(party) {
                continue;
            }
            shares.insert(party.clone(), record.v_stake / total);
        }
        shares
    }

    /// Shares over all known providers.
    #[must_use]
    pub fn all_shares(&self) -> BTreeMap<PartyId, Decimal> {
        self.shares_except(&BTreeSet::new())
    }

    #[must_use]
    pub fn total_v_stake(&self) -> Decimal {
        self.total_v_stake
    }

    #[must_use]
    pub fn total_p_stake(&self) -> Decimal {
        self.total_p_stake
    }

    /// All provider parties, in deterministic order.
    pub fn parties(&self) -> impl Iterator<Item = &PartyId> {
        self.lps.keys()
    }
}
