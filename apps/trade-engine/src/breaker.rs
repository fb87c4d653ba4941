//! Day-scoped circuit breaker.
//!
//! Trading halts for the rest of the day when either the daily loss limit or
//! the consecutive-loss limit is hit. The halt latches: nothing un-trips it
//! except the next trading day's date roll. Exits keep running while halted;
//! only new entries stop.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RiskLimits;
use crate::store::{JsonStore, StoreError};

/// Breaker error.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persisted breaker state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    /// Date this state belongs to.
    pub trading_date: Option<NaiveDate>,
    /// Account equity at the first check of the day.
    pub day_open_equity: Option<Decimal>,
    /// Equity-based P&L at the last check.
    pub daily_pnl: Decimal,
    /// Losing closes in a row today.
    pub consecutive_losses: u32,
    /// Realized P&L of every close today.
    pub closed_trade_pnls: Vec<Decimal>,
    /// Whether trading is halted.
    pub halted: bool,
    /// Why, when halted.
    pub halt_reason: Option<String>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            trading_date: None,
            day_open_equity: None,
            daily_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            closed_trade_pnls: Vec::new(),
            halted: false,
            halt_reason: None,
        }
    }
}

/// Durable circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    max_daily_loss_pct: Decimal,
    max_consecutive_losses: u32,
    store: JsonStore,
}

impl CircuitBreaker {
    const DOC: &'static str = "breaker";

    /// Load breaker state from the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the document exists but cannot be parsed.
    pub fn load(store: JsonStore, limits: &RiskLimits) -> Result<Self, BreakerError> {
        let state = store.load(Self::DOC)?;
        Ok(Self {
            state,
            max_daily_loss_pct: limits.max_daily_loss_pct,
            max_consecutive_losses: limits.max_consecutive_losses,
            store,
        })
    }

    fn persist(&self) -> Result<(), BreakerError> {
        self.store.save(Self::DOC, &self.state)?;
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &BreakerState {
        &self.state
    }

    /// Whether new entries are halted.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.state.halted
    }

    /// Start a new trading day if the date has rolled.
    ///
    /// Anchors the day's P&L baseline at the first equity reading and clears
    /// yesterday's halt, counters, and trade log.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn roll_date(&mut self, today: NaiveDate, equity: Decimal) -> Result<(), BreakerError> {
        if self.state.trading_date == Some(today) {
            return Ok(());
        }
        if self.state.halted {
            info!(date = %today, "New trading day, clearing circuit breaker halt");
        }
        self.state = BreakerState {
            trading_date: Some(today),
            day_open_equity: Some(equity),
            ..BreakerState::default()
        };
        self.persist()
    }

    /// Record a closed trade's realized P&L.
    ///
    /// Trips the breaker when the consecutive-loss limit is reached.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn record_trade(&mut self, realized_pnl: Decimal) -> Result<(), BreakerError> {
        self.state.closed_trade_pnls.push(realized_pnl);
        if realized_pnl < Decimal::ZERO {
            self.state.consecutive_losses += 1;
        } else {
            self.state.consecutive_losses = 0;
        }

        if !self.state.halted && self.state.consecutive_losses >= self.max_consecutive_losses {
            self.trip(format!(
                "{} consecutive losing trades",
                self.state.consecutive_losses
            ));
        }
        self.persist()
    }

    /// Check the daily loss limit against current account equity.
    ///
    /// Daily P&L is the equity delta from the day's baseline, so it covers
    /// realized and unrealized losses alike.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn check_equity(&mut self, equity: Decimal) -> Result<bool, BreakerError> {
        let Some(baseline) = self.state.day_open_equity else {
            return Ok(self.state.halted);
        };
        self.state.daily_pnl = equity - baseline;

        let loss_limit = baseline * self.max_daily_loss_pct;
        if !self.state.halted && self.state.daily_pnl <= -loss_limit {
            self.trip(format!(
                "daily loss {} exceeds limit {}",
                self.state.daily_pnl, loss_limit
            ));
        }
        self.persist()?;
        Ok(self.state.halted)
    }

    fn trip(&mut self, reason: String) {
        warn!(reason = %reason, "Circuit breaker tripped, halting new entries for the day");
        self.state.halted = true;
        self.state.halt_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker() -> (CircuitBreaker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        (
            CircuitBreaker::load(store, &RiskLimits::default()).unwrap(),
            dir,
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    #[test]
    fn daily_loss_limit_trips() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        assert!(!breaker.check_equity(dec!(98_000)).unwrap());
        // 3% of 100k is the line.
        assert!(breaker.check_equity(dec!(97_000)).unwrap());
        assert!(breaker.is_halted());
        assert!(breaker.state().halt_reason.is_some());
    }

    #[test]
    fn consecutive_losses_trip() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.record_trade(dec!(-50)).unwrap();
        breaker.record_trade(dec!(-10)).unwrap();
        assert!(!breaker.is_halted());
        breaker.record_trade(dec!(-5)).unwrap();
        assert!(breaker.is_halted());
    }

    #[test]
    fn winner_resets_the_streak() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.record_trade(dec!(-50)).unwrap();
        breaker.record_trade(dec!(-10)).unwrap();
        breaker.record_trade(dec!(200)).unwrap();
        breaker.record_trade(dec!(-5)).unwrap();
        assert!(!breaker.is_halted());
        assert_eq!(breaker.state().consecutive_losses, 1);
    }

    #[test]
    fn halt_latches_for_the_day() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.check_equity(dec!(96_000)).unwrap();
        assert!(breaker.is_halted());
        // Recovery does not un-trip.
        assert!(breaker.check_equity(dec!(101_000)).unwrap());
    }

    #[test]
    fn date_roll_clears_the_halt() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.check_equity(dec!(96_000)).unwrap();
        assert!(breaker.is_halted());

        breaker.roll_date(day(27), dec!(96_000)).unwrap();
        assert!(!breaker.is_halted());
        assert_eq!(breaker.state().day_open_equity, Some(dec!(96_000)));
        assert_eq!(breaker.state().consecutive_losses, 0);
    }

    #[test]
    fn same_day_roll_is_a_no_op() {
        let (mut breaker, _dir) = breaker();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.record_trade(dec!(-50)).unwrap();
        breaker.roll_date(day(26), dec!(99_950)).unwrap();
        assert_eq!(breaker.state().consecutive_losses, 1);
        assert_eq!(breaker.state().day_open_equity, Some(dec!(100_000)));
    }

    #[test]
    fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let mut breaker = CircuitBreaker::load(store.clone(), &RiskLimits::default()).unwrap();
        breaker.roll_date(day(26), dec!(100_000)).unwrap();
        breaker.check_equity(dec!(95_000)).unwrap();
        drop(breaker);

        let reloaded = CircuitBreaker::load(store, &RiskLimits::default()).unwrap();
        assert!(reloaded.is_halted());
    }
}
