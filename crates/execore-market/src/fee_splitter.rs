//! Rolling trade-value window feeding the market-value-proxy.
//!
//! The market-value-proxy (MVP) answers "what is this market worth to its
//! liquidity providers right now": the larger of the total committed stake
//! and the window's trade value extrapolated to a full window. A rolling
//! average of per-window trade value feeds equity-share growth.

use execore_types::{ExecoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSplitter {
    /// Start of the current window, nanoseconds.
    time_window_start: i64,
    /// Latest observed time; invariant `current_time >= time_window_start`.
    current_time: i64,
    /// Trade value accumulated in the current window.
    trade_value: Decimal,
    /// Rolling average trade value across completed windows.
    avg: Decimal,
    /// Window counter, monotonic from 1.
    window: u64,
}

impl Default for FeeSplitter {
    fn default() -> Self {
        Self {
            time_window_start: 0,
            current_time: 0,
            trade_value: Decimal::ZERO,
            avg: Decimal::ZERO,
            window: 1,
        }
    }
}

impl FeeSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock. Time before the window start means the caller
    /// replayed commands out of order, which is a hard error.
    pub fn set_current_time(&mut self, now: i64) -> Result<()> {
        if now < self.time_window_start {
            return Err(ExecoreError::TimeBackwards {
                current: now,
                window_start: self.time_window_start,
            });
        }
        self.current_time = now;
        Ok(())
    }

    /// Rolls the window over: folds the finished window's trade value into
    /// the rolling average, then resets the accumulator at `start`.
    ///
    /// The window counter only advances once the average has left zero,
    /// i.e. once the opening auction has produced any value at all —
    /// empty pre-open windows must not dilute the average.
    pub fn time_window_start(&mut self, start: i64) {
        let window = Decimal::from(self.window);
        self.avg = self.avg * ((window - Decimal::ONE) / window) + self.trade_value / window;
        if !self.avg.is_zero() {
            self.window += 1;
        }
        self.trade_value = Decimal::ZERO;
        self.time_window_start = start;
        self.current_time = start;
    }

    pub fn add_trade_value(&mut self, value: Decimal) {
        self.trade_value += value;
    }

    /// `elapsed − max(elapsed − window_length, 0)`: how much of the value
    /// window has actually been active.
    fn active_window_length(&self, window_length: i64) -> i64 {
        let elapsed = self.current_time - self.time_window_start;
        elapsed - (elapsed - window_length).max(0)
    }

    /// The market-value-proxy: committed stake, or the window's trade
    /// value extrapolated to a full window, whichever is larger. With no
    /// active window yet, exactly the total stake.
    #[must_use]
    pub fn market_value_proxy(&self, window_length: i64, total_stake: Decimal) -> Decimal {
        let active = self.active_window_length(window_length);
        if active > 0 {
            let factor = Decimal::from(window_length) / Decimal::from(active);
            return total_stake.max(factor * self.trade_value);
        }
        total_stake
    }

    #[must_use]
    pub fn avg_trade_value(&self) -> Decimal {
        self.avg
    }

    #[must_use]
    pub fn window(&self) -> u64 {
        self.window
    }

    #[must_use]
    pub fn current_time(&self) -> i64 {
        self.current_time
    }

    #[must_use]
    pub fn window_start(&self) -> i64 {
        self.time_window_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn mvp_is_total_stake_before_any_elapsed_time() {
        let fs = FeeSplitter::new();
        assert_eq!(
            fs.market_value_proxy(3600, dec("5000")),
            dec("5000")
        );
    }

    #[test]
    fn mvp_extrapolates_partial_window() {
        let mut fs = FeeSplitter::new();
        fs.set_current_time(900).unwrap();
        fs.add_trade_value(dec("100"));
        // A quarter of a 3600ns window has passed: value scales by 4.
        assert_eq!(fs.market_value_proxy(3600, dec("1")), dec("400"));
    }

    #[test]
    fn mvp_floors_at_total_stake() {
        let mut fs = FeeSplitter::new();
        fs.set_current_time(900).unwrap();
        fs.add_trade_value(dec("100"));
        assert_eq!(fs.market_value_proxy(3600, dec("10000")), dec("10000"));
    }

    #[test]
    fn active_window_caps_at_window_length() {
        let mut fs = FeeSplitter::new();
        fs.set_current_time(10_000).unwrap();
        fs.add_trade_value(dec("100"));
        // Elapsed far exceeds the window: no extrapolation.
        assert_eq!(fs.market_value_proxy(3600, dec("1")), dec("100"));
    }

    #[test]
    fn time_before_window_start_is_a_hard_error() {
        let mut fs = FeeSplitter::new();
        fs.time_window_start(1000);
        let err = fs.set_current_time(500).unwrap_err();
        assert!(matches!(err, ExecoreError::TimeBackwards { .. }));
    }

    #[test]
    fn window_counter_only_advances_once_avg_nonzero() {
        let mut fs = FeeSplitter::new();
        assert_eq!(fs.window(), 1);
        // Empty windows roll over without advancing the counter.
        fs.time_window_start(100);
        fs.time_window_start(200);
        assert_eq!(fs.window(), 1);

        fs.add_trade_value(dec("300"));
        fs.time_window_start(300);
        assert_eq!(fs.avg_trade_value(), dec("300"));
        assert_eq!(fs.window(), 2);

        fs.add_trade_value(dec("500"));
        fs.time_window_start(400);
        // avg = 300·(1/2) + 500/2 = 400
        assert_eq!(fs.avg_trade_value(), dec("400"));
        assert_eq!(fs.window(), 3);
    }
}
