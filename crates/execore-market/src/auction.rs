//! Auction state machine.
//!
//! Exactly one trigger/mode pair is active at any time. The opening
//! auction happens once in a market's lifetime; monitoring auctions
//! (price, liquidity) toggle the market between Suspended and Active.
//! Entry and exit are two-phase: a monitor flags the transition (`start`
//! or `stop`), and the market orchestrator performs the book side effects
//! before confirming it.

use execore_types::{AuctionTrigger, ExecoreError, Result, TradingMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionState {
    mode: TradingMode,
    default_mode: TradingMode,
    trigger: AuctionTrigger,
    /// Trigger of a pending extension, reset when the extension is read.
    extension: Option<AuctionTrigger>,
    /// Auction start, nanoseconds; `None` outside auction.
    begin: Option<i64>,
    /// Scheduled end; `None` means the auction has no time bound.
    end: Option<i64>,
    /// Entry flagged but book side effects not yet applied.
    start: bool,
    /// Exit conditions met; the orchestrator may uncross and leave.
    stop: bool,
    /// Set once the opening auction has been left; it never recurs.
    opening_done: bool,
}

impl AuctionState {
    /// A market opens in its one-time opening auction.
    #[must_use]
    pub fn opening(now: i64, duration: i64) -> Self {
        Self {
            mode: TradingMode::OpeningAuction,
            default_mode: TradingMode::Continuous,
            trigger: AuctionTrigger::Opening,
            extension: None,
            begin: Some(now),
            end: Some(now + duration),
            start: true,
            stop: false,
            opening_done: false,
        }
    }

    #[must_use]
    pub fn in_auction(&self) -> bool {
        matches!(
            self.mode,
            TradingMode::OpeningAuction | TradingMode::MonitoringAuction
        )
    }

    #[must_use]
    pub fn is_opening_auction(&self) -> bool {
        self.trigger == AuctionTrigger::Opening
    }

    #[must_use]
    pub fn is_price_auction(&self) -> bool {
        self.trigger == AuctionTrigger::Price
    }

    #[must_use]
    pub fn is_liquidity_auction(&self) -> bool {
        self.trigger == AuctionTrigger::Liquidity
    }

    #[must_use]
    pub fn trigger(&self) -> AuctionTrigger {
        self.trigger
    }

    #[must_use]
    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    #[must_use]
    pub fn begin(&self) -> Option<i64> {
        self.begin
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.end
    }

    /// Entry flagged but not yet performed by the orchestrator.
    #[must_use]
    pub fn auction_start(&self) -> bool {
        self.start
    }

    /// Exit conditions met; the orchestrator may uncross and leave.
    #[must_use]
    pub fn can_leave(&self) -> bool {
        self.stop
    }

    #[must_use]
    pub fn duration_exceeded(&self, now: i64) -> bool {
        self.end.is_some_and(|end| now >= end)
    }

    /// Flags a liquidity auction. From continuous trading this starts a
    /// new auction; from within another auction it becomes an extension.
    pub fn start_liquidity_auction(&mut self, now: i64, end: Option<i64>) {
        if self.in_auction() {
            self.extend_auction(AuctionTrigger::Liquidity, end);
            return;
        }
        self.mode = TradingMode::MonitoringAuction;
        self.trigger = AuctionTrigger::Liquidity;
        self.begin = Some(now);
        self.end = end;
        self.start = true;
        self.stop = false;
    }

    /// Flags a price-monitoring auction, or extends the current auction
    /// when one is already running.
    pub fn start_price_auction(&mut self, now: i64, end: Option<i64>) {
        if self.in_auction() {
            self.extend_auction(AuctionTrigger::Price, end);
            return;
        }
        self.mode = TradingMode::MonitoringAuction;
        self.trigger = AuctionTrigger::Price;
        self.begin = Some(now);
        self.end = end;
        self.start = true;
        self.stop = false;
    }

    /// Extends the current auction and cancels any pending exit.
    pub fn extend_auction(&mut self, trigger: AuctionTrigger, new_end: Option<i64>) {
        self.extension = Some(trigger);
        if new_end.is_some() {
            self.end = new_end;
        }
        self.stop = false;
    }

    /// Takes the pending extension trigger, if any.
    pub fn take_extension(&mut self) -> Option<AuctionTrigger> {
        self.extension.take()
    }

    /// Applies a raised minimum duration to the running auction. Returns
    /// the new scheduled end when it had to move out.
    pub fn update_min_duration(&mut self, min_duration: i64) -> Option<i64> {
        if !self.in_auction() {
            return None;
        }
        // Unbounded auctions (liquidity) already outlast any minimum.
        let min_end = self.begin? + min_duration;
        if self.end? >= min_end {
            return None;
        }
        self.end = Some(min_end);
        self.stop = false;
        Some(min_end)
    }

    /// Confirms the orchestrator has applied auction-entry side effects.
    pub fn auction_started(&mut self) {
        self.start = false;
    }

    /// Marks exit conditions as satisfied.
    pub fn set_ready_to_leave(&mut self) {
        self.stop = true;
    }

    /// Confirms the auction exit after uncrossing. Only valid once the
    /// state is ready to leave; anything else is an orchestrator bug.
    pub fn left(&mut self) -> Result<AuctionTrigger> {
        if !self.stop {
            return Err(ExecoreError::CannotLeaveAuction {
                reason: format!("auction with trigger {} is not ready to leave", self.trigger),
            });
        }
        let trigger = self.trigger;
        if trigger == AuctionTrigger::Opening {
            self.opening_done = true;
        }
        self.mode = self.default_mode;
        self.trigger = AuctionTrigger::Unspecified;
        self.extension = None;
        self.begin = None;
        self.end = None;
        self.start = false;
        self.stop = false;
        Ok(trigger)
    }

    /// True once the one-time opening auction has completed.
    #[must_use]
    pub fn opening_auction_done(&self) -> bool {
        self.opening_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_auction_lifecycle() {
        let mut state = AuctionState::opening(100, 50);
        assert!(state.in_auction());
        assert!(state.is_opening_auction());
        assert!(state.auction_start());
        assert_eq!(state.expires_at(), Some(150));

        state.auction_started();
        assert!(!state.auction_start());
        assert!(!state.can_leave());
        assert!(state.duration_exceeded(150));

        state.set_ready_to_leave();
        let trigger = state.left().unwrap();
        assert_eq!(trigger, AuctionTrigger::Opening);
        assert!(!state.in_auction());
        assert_eq!(state.mode(), TradingMode::Continuous);
        assert!(state.opening_auction_done());
    }

    #[test]
    fn cannot_leave_unless_ready() {
        let mut state = AuctionState::opening(0, 10);
        assert!(state.left().is_err());
    }

    #[test]
    fn liquidity_auction_from_continuous() {
        let mut state = AuctionState::opening(0, 10);
        state.set_ready_to_leave();
        state.left().unwrap();

        state.start_liquidity_auction(20, Some(120));
        assert!(state.in_auction());
        assert!(state.is_liquidity_auction());
        assert_eq!(state.mode(), TradingMode::MonitoringAuction);
        assert!(state.auction_start());
    }

    #[test]
    fn starting_within_auction_extends_instead() {
        let mut state = AuctionState::opening(0, 10);
        state.auction_started();
        state.set_ready_to_leave();

        // A price trigger while still in the opening auction extends it
        // and cancels the pending exit.
        state.start_price_auction(5, Some(30));
        assert!(state.is_opening_auction());
        assert!(!state.can_leave());
        assert_eq!(state.expires_at(), Some(30));
        assert_eq!(state.take_extension(), Some(AuctionTrigger::Price));
        assert_eq!(state.take_extension(), None);
    }

    #[test]
    fn raised_min_duration_pushes_out_the_end() {
        let mut state = AuctionState::opening(100, 50);
        state.auction_started();
        state.set_ready_to_leave();

        // Already satisfied: nothing moves, pending exit survives.
        assert_eq!(state.update_min_duration(40), None);
        assert!(state.can_leave());

        assert_eq!(state.update_min_duration(80), Some(180));
        assert_eq!(state.expires_at(), Some(180));
        assert!(!state.can_leave());

        // Outside auction it is a no-op.
        state.set_ready_to_leave();
        state.left().unwrap();
        assert_eq!(state.update_min_duration(500), None);
    }
}
