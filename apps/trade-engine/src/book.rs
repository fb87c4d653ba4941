//! Position book and exit rules.
//!
//! Tracks every open position with its protective levels and evaluates the
//! exit chain each monitor cycle. Exit checks are ordered; the first rule
//! that fires wins and later rules are not consulted for that ticker:
//!
//! 1. hard stop
//! 2. profit target
//! 3. trailing stop
//! 4. time-based holds
//!
//! A ticker with no current price is skipped for the cycle, never treated as
//! a zero price.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::SignalTier;
use crate::store::{JsonStore, StoreError};

/// Book error.
#[derive(Debug, Error)]
pub enum BookError {
    /// A position for this ticker already exists.
    #[error("position already open for {ticker}")]
    AlreadyOpen {
        /// Offending ticker.
        ticker: String,
    },

    /// No position for this ticker.
    #[error("no position for {ticker}")]
    NotFound {
        /// Requested ticker.
        ticker: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Exit rule that closed (or wants to close) a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Price at or below the hard stop.
    StopLoss,
    /// Price at or above the profit target.
    TakeProfit,
    /// Price at or below the trailing stop.
    TrailingStop,
    /// Held five or more days at a loss.
    TimeLossCut,
    /// Held eight or more days without meaningful progress.
    TimeStagnant,
    /// Held twelve or more days without an exceptional gain.
    TimeMax,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingStop => "trailing_stop",
            Self::TimeLossCut => "time_loss_cut",
            Self::TimeStagnant => "time_stagnant",
            Self::TimeMax => "time_max",
        };
        write!(f, "{s}")
    }
}

/// Exit thresholds and holding rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    /// Hard stop distance for tier A positions.
    pub stop_pct_tier_a: Decimal,
    /// Hard stop distance for tier B positions.
    pub stop_pct_tier_b: Decimal,
    /// Hard stop distance for tier C positions.
    pub stop_pct_tier_c: Decimal,
    /// Profit target distance.
    pub take_profit_pct: Decimal,
    /// Gain required before a trailing stop activates.
    pub trail_activation_pct: Decimal,
    /// Days after which a losing position is cut.
    pub max_days_losing: i64,
    /// Days after which a stagnant position is cut.
    pub max_days_stagnant: i64,
    /// Gain below which a position counts as stagnant.
    pub stagnant_gain_pct: Decimal,
    /// Absolute holding limit.
    pub max_days_held: i64,
    /// Gain that exempts a position from the absolute limit.
    pub max_days_exempt_gain_pct: Decimal,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            stop_pct_tier_a: dec!(0.08),
            stop_pct_tier_b: dec!(0.065),
            stop_pct_tier_c: dec!(0.05),
            take_profit_pct: dec!(0.08),
            trail_activation_pct: dec!(0.04),
            max_days_losing: 5,
            max_days_stagnant: 8,
            stagnant_gain_pct: dec!(0.03),
            max_days_held: 12,
            max_days_exempt_gain_pct: dec!(0.15),
        }
    }
}

impl BookConfig {
    /// Hard stop distance for a tier.
    #[must_use]
    pub const fn stop_pct(&self, tier: SignalTier) -> Decimal {
        match tier {
            SignalTier::A => self.stop_pct_tier_a,
            SignalTier::B => self.stop_pct_tier_b,
            SignalTier::C => self.stop_pct_tier_c,
        }
    }

    /// Trailing distance for a gain from entry, `None` below activation.
    ///
    /// Wider bands at larger gains give winners room while still locking in
    /// most of the move.
    #[must_use]
    pub fn trail_pct(&self, gain_pct: Decimal) -> Option<Decimal> {
        if gain_pct >= dec!(0.15) {
            Some(dec!(0.08))
        } else if gain_pct >= dec!(0.08) {
            Some(dec!(0.05))
        } else if gain_pct >= self.trail_activation_pct {
            Some(dec!(0.03))
        } else {
            None
        }
    }
}

/// One open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument ticker.
    pub ticker: String,
    /// Share quantity.
    pub qty: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Total entry cost (`entry_price * qty`), tracked through corrections.
    #[serde(default)]
    pub cost_basis: Decimal,
    /// Conviction tier at entry.
    pub tier: SignalTier,
    /// Signal score at entry; zero for adopted positions.
    #[serde(default)]
    pub score: Decimal,
    /// Hard stop level.
    pub stop_price: Decimal,
    /// Profit target level.
    pub target_price: Decimal,
    /// Trailing stop level, once activated.
    pub trailing_stop: Option<Decimal>,
    /// Highest price seen since entry.
    pub highest_price: Decimal,
    /// Sector label, if known.
    pub sector: Option<String>,
    /// Day the position was opened.
    pub opened_on: NaiveDate,
    /// Exit rule whose sell order is in flight, when one is.
    #[serde(default)]
    pub pending_exit: Option<ExitReason>,
}

impl Position {
    /// Gain (or loss) from entry at `price`, as a fraction.
    #[must_use]
    pub fn gain_pct(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) / self.entry_price
    }

    /// Calendar days held as of `today`.
    #[must_use]
    pub fn days_held(&self, today: NaiveDate) -> i64 {
        (today - self.opened_on).num_days()
    }
}

/// A position the exit chain wants closed.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    /// Ticker to close.
    pub ticker: String,
    /// Rule that fired.
    pub reason: ExitReason,
    /// Price the rule was evaluated at.
    pub price: Decimal,
}

/// A completed exit, kept until the end-of-day summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRecord {
    /// Ticker that was closed.
    pub ticker: String,
    /// Rule that closed it.
    pub reason: ExitReason,
    /// Shares closed.
    pub qty: Decimal,
    /// Entry price.
    pub entry_price: Decimal,
    /// Exit fill price.
    pub exit_price: Decimal,
    /// Realized profit or loss.
    pub realized_pnl: Decimal,
    /// When the exit completed.
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookDoc {
    positions: BTreeMap<String, Position>,
    exits_today: Vec<ExitRecord>,
}

/// Durable position book.
#[derive(Debug)]
pub struct PositionBook {
    doc: BookDoc,
    config: BookConfig,
    store: JsonStore,
}

impl PositionBook {
    const DOC: &'static str = "positions";

    /// Load the book from the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the document exists but cannot be parsed.
    pub fn load(store: JsonStore, config: BookConfig) -> Result<Self, BookError> {
        let doc = store.load(Self::DOC)?;
        Ok(Self { doc, config, store })
    }

    fn persist(&self) -> Result<(), BookError> {
        self.store.save(Self::DOC, &self.doc)?;
        Ok(())
    }

    /// Number of open positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.positions.len()
    }

    /// Whether the book is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.positions.is_empty()
    }

    /// Look up one position.
    #[must_use]
    pub fn get(&self, ticker: &str) -> Option<&Position> {
        self.doc.positions.get(ticker)
    }

    /// All open positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.doc.positions.values().cloned().collect()
    }

    /// Open tickers.
    #[must_use]
    pub fn tickers(&self) -> Vec<String> {
        self.doc.positions.keys().cloned().collect()
    }

    /// Exits completed since the last end-of-day sweep.
    #[must_use]
    pub fn exits_today(&self) -> &[ExitRecord] {
        &self.doc.exits_today
    }

    /// Open a position from a fill, deriving stop and target from the tier.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOpen` when the ticker is already in the book.
    pub fn open_position(
        &mut self,
        ticker: &str,
        qty: Decimal,
        entry_price: Decimal,
        tier: SignalTier,
        score: Decimal,
        sector: Option<String>,
        today: NaiveDate,
    ) -> Result<Position, BookError> {
        if self.doc.positions.contains_key(ticker) {
            return Err(BookError::AlreadyOpen {
                ticker: ticker.to_string(),
            });
        }
        let stop_pct = self.config.stop_pct(tier);
        let position = Position {
            ticker: ticker.to_string(),
            qty,
            entry_price,
            cost_basis: entry_price * qty,
            tier,
            score,
            stop_price: entry_price * (Decimal::ONE - stop_pct),
            target_price: entry_price * (Decimal::ONE + self.config.take_profit_pct),
            trailing_stop: None,
            highest_price: entry_price,
            sector,
            opened_on: today,
            pending_exit: None,
        };
        info!(
            ticker,
            qty = %qty,
            entry = %entry_price,
            stop = %position.stop_price,
            target = %position.target_price,
            tier = ?tier,
            "Position opened"
        );
        self.doc.positions.insert(ticker.to_string(), position.clone());
        self.persist()?;
        Ok(position)
    }

    /// Adopt a position that exists at the broker but not locally.
    ///
    /// Gets default-tier protective levels from the broker's average entry;
    /// entry date is unknown, so holding clocks start today.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOpen` when the ticker is already in the book.
    pub fn adopt(
        &mut self,
        ticker: &str,
        qty: Decimal,
        avg_entry_price: Decimal,
        today: NaiveDate,
    ) -> Result<Position, BookError> {
        warn!(ticker, qty = %qty, "Adopting untracked broker position");
        self.open_position(
            ticker,
            qty,
            avg_entry_price,
            SignalTier::C,
            Decimal::ZERO,
            None,
            today,
        )
    }

    /// Correct a position's quantity to the broker's figure.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticker is not in the book.
    pub fn set_qty(&mut self, ticker: &str, qty: Decimal) -> Result<(), BookError> {
        let position = self
            .doc
            .positions
            .get_mut(ticker)
            .ok_or_else(|| BookError::NotFound {
                ticker: ticker.to_string(),
            })?;
        position.qty = qty;
        position.cost_basis = position.entry_price * qty;
        self.persist()?;
        Ok(())
    }

    /// Mark or clear an in-flight exit for a ticker.
    ///
    /// A position with a pending exit is skipped by `check_exits` until the
    /// sell resolves one way or the other.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticker is not in the book.
    pub fn set_pending_exit(
        &mut self,
        ticker: &str,
        reason: Option<ExitReason>,
    ) -> Result<(), BookError> {
        let position = self
            .doc
            .positions
            .get_mut(ticker)
            .ok_or_else(|| BookError::NotFound {
                ticker: ticker.to_string(),
            })?;
        position.pending_exit = reason;
        self.persist()?;
        Ok(())
    }

    /// Drop a position without recording an exit (reconciliation removal).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticker is not in the book.
    pub fn remove(&mut self, ticker: &str) -> Result<Position, BookError> {
        let position = self
            .doc
            .positions
            .remove(ticker)
            .ok_or_else(|| BookError::NotFound {
                ticker: ticker.to_string(),
            })?;
        self.persist()?;
        Ok(position)
    }

    /// Close a position at `exit_price` and record the realized exit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticker is not in the book.
    pub fn close_position(
        &mut self,
        ticker: &str,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ExitRecord, BookError> {
        let position = self
            .doc
            .positions
            .remove(ticker)
            .ok_or_else(|| BookError::NotFound {
                ticker: ticker.to_string(),
            })?;
        let realized_pnl = (exit_price - position.entry_price) * position.qty;
        let record = ExitRecord {
            ticker: ticker.to_string(),
            reason,
            qty: position.qty,
            entry_price: position.entry_price,
            exit_price,
            realized_pnl,
            at: now,
        };
        info!(
            ticker,
            reason = %reason,
            exit = %exit_price,
            pnl = %realized_pnl,
            "Position closed"
        );
        self.doc.exits_today.push(record.clone());
        self.persist()?;
        Ok(record)
    }

    /// Clear the daily exit log after the end-of-day summary.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn clear_exits(&mut self) -> Result<Vec<ExitRecord>, BookError> {
        let exits = std::mem::take(&mut self.doc.exits_today);
        if !exits.is_empty() {
            self.persist()?;
        }
        Ok(exits)
    }

    /// Ratchet highest prices and trailing stops from current prices.
    ///
    /// Trailing stops only tighten. A price below the current high leaves
    /// the stop where it is.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn update_trailing_stops(
        &mut self,
        prices: &HashMap<String, Decimal>,
    ) -> Result<(), BookError> {
        let mut changed = false;
        for position in self.doc.positions.values_mut() {
            let Some(&price) = prices.get(&position.ticker) else {
                continue;
            };
            if price > position.highest_price {
                position.highest_price = price;
                changed = true;
            }
            let gain_from_entry =
                (position.highest_price - position.entry_price) / position.entry_price;
            if let Some(trail_pct) = self.config.trail_pct(gain_from_entry) {
                let candidate = position.highest_price * (Decimal::ONE - trail_pct);
                if position.trailing_stop.map_or(true, |current| candidate > current) {
                    info!(
                        ticker = %position.ticker,
                        trailing_stop = %candidate,
                        high = %position.highest_price,
                        "Trailing stop ratcheted"
                    );
                    position.trailing_stop = Some(candidate);
                    changed = true;
                }
            }
        }
        if changed {
            self.persist()?;
        }
        Ok(())
    }

    /// Evaluate the exit chain for every position with a price.
    #[must_use]
    pub fn check_exits(
        &self,
        prices: &HashMap<String, Decimal>,
        today: NaiveDate,
    ) -> Vec<ExitSignal> {
        let mut signals = Vec::new();
        for position in self.doc.positions.values() {
            if position.pending_exit.is_some() {
                continue;
            }
            let Some(&price) = prices.get(&position.ticker) else {
                warn!(ticker = %position.ticker, "No price this cycle, skipping exit checks");
                continue;
            };
            if let Some(reason) = self.exit_reason(position, price, today) {
                signals.push(ExitSignal {
                    ticker: position.ticker.clone(),
                    reason,
                    price,
                });
            }
        }
        signals
    }

    fn exit_reason(
        &self,
        position: &Position,
        price: Decimal,
        today: NaiveDate,
    ) -> Option<ExitReason> {
        if price <= position.stop_price {
            return Some(ExitReason::StopLoss);
        }
        if price >= position.target_price {
            return Some(ExitReason::TakeProfit);
        }
        if let Some(trailing) = position.trailing_stop {
            if price <= trailing {
                return Some(ExitReason::TrailingStop);
            }
        }

        let days = position.days_held(today);
        let gain = position.gain_pct(price);
        if days >= self.config.max_days_losing && gain < Decimal::ZERO {
            return Some(ExitReason::TimeLossCut);
        }
        if days >= self.config.max_days_stagnant && gain < self.config.stagnant_gain_pct {
            return Some(ExitReason::TimeStagnant);
        }
        if days >= self.config.max_days_held && gain < self.config.max_days_exempt_gain_pct {
            return Some(ExitReason::TimeMax);
        }
        None
    }
}
