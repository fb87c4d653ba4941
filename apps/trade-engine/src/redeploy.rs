//! Capital redeployment queue.
//!
//! When an exit frees capital mid-session, the engine may rotate it into
//! the best queued candidate instead of letting it sit until tomorrow.
//! Redeployment is deliberately conservative: a minimum amount of freed
//! capital, a cutoff before the close, and a daily cap all gate it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::broker::MarketClock;
use crate::models::TradeCandidate;
use crate::store::{JsonStore, StoreError};

/// Queue error.
#[derive(Debug, Error)]
pub enum RedeployError {
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a redeployment was not allowed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeployBlock {
    /// Freed capital below the minimum worth acting on.
    BelowMinimum,
    /// Market is closed.
    MarketClosed,
    /// Inside the no-new-entries window before the close.
    TooCloseToClose,
    /// Daily redeployment cap reached.
    DailyCapReached,
}

/// Redeployment gates.
#[derive(Debug, Clone)]
pub struct RedeployConfig {
    /// Minimum freed capital worth redeploying.
    pub min_freed_capital: Decimal,
    /// No redeployment inside this window before the close.
    pub min_minutes_before_close: i64,
    /// Redeployments allowed per day.
    pub max_per_day: u32,
    /// Queued candidates older than this are dropped.
    pub candidate_ttl_hours: i64,
}

impl Default for RedeployConfig {
    fn default() -> Self {
        Self {
            min_freed_capital: dec!(1000),
            min_minutes_before_close: 30,
            max_per_day: 3,
            candidate_ttl_hours: 24,
        }
    }
}

/// A candidate waiting for freed capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedCandidate {
    /// The candidate.
    pub candidate: TradeCandidate,
    /// When it entered the queue.
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDoc {
    candidates: Vec<QueuedCandidate>,
    deployed_today: u32,
    date: Option<NaiveDate>,
}

/// Durable redeployment queue.
#[derive(Debug)]
pub struct RedeploymentQueue {
    doc: QueueDoc,
    config: RedeployConfig,
    store: JsonStore,
}

impl RedeploymentQueue {
    const DOC: &'static str = "redeploy_queue";

    /// Load the queue from the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the document exists but cannot be parsed.
    pub fn load(store: JsonStore, config: RedeployConfig) -> Result<Self, RedeployError> {
        let doc = store.load(Self::DOC)?;
        Ok(Self { doc, config, store })
    }

    fn persist(&self) -> Result<(), RedeployError> {
        self.store.save(Self::DOC, &self.doc)?;
        Ok(())
    }

    /// Queue length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.candidates.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.candidates.is_empty()
    }

    /// Redeployments executed today.
    #[must_use]
    pub const fn deployed_today(&self) -> u32 {
        self.doc.deployed_today
    }

    /// Reset the daily counter when the date rolls.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn roll_date(&mut self, today: NaiveDate) -> Result<(), RedeployError> {
        if self.doc.date == Some(today) {
            return Ok(());
        }
        self.doc.date = Some(today);
        self.doc.deployed_today = 0;
        self.persist()
    }

    /// Add a candidate, keeping at most one entry per ticker.
    ///
    /// A ticker already queued keeps whichever entry scores higher.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn push(
        &mut self,
        candidate: TradeCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), RedeployError> {
        if let Some(existing) = self
            .doc
            .candidates
            .iter_mut()
            .find(|q| q.candidate.ticker == candidate.ticker)
        {
            if candidate.score > existing.candidate.score {
                debug!(
                    ticker = %candidate.ticker,
                    old_score = %existing.candidate.score,
                    new_score = %candidate.score,
                    "Replacing queued candidate with higher score"
                );
                existing.candidate = candidate;
                existing.queued_at = now;
                self.persist()?;
            }
            return Ok(());
        }
        self.doc.candidates.push(QueuedCandidate {
            candidate,
            queued_at: now,
        });
        self.persist()
    }

    /// Check every redeployment gate.
    ///
    /// # Errors
    ///
    /// Returns the first gate that blocks.
    pub fn can_redeploy(
        &self,
        freed_capital: Decimal,
        clock: &MarketClock,
        now: DateTime<Utc>,
    ) -> Result<(), RedeployBlock> {
        if freed_capital < self.config.min_freed_capital {
            return Err(RedeployBlock::BelowMinimum);
        }
        if !clock.is_open {
            return Err(RedeployBlock::MarketClosed);
        }
        if clock.next_close - now < Duration::minutes(self.config.min_minutes_before_close) {
            return Err(RedeployBlock::TooCloseToClose);
        }
        if self.doc.deployed_today >= self.config.max_per_day {
            return Err(RedeployBlock::DailyCapReached);
        }
        Ok(())
    }

    /// Best queued candidate not already held and at or above `min_score`.
    #[must_use]
    pub fn best_candidate(&self, held: &[String], min_score: Decimal) -> Option<TradeCandidate> {
        self.doc
            .candidates
            .iter()
            .filter(|q| q.candidate.score >= min_score)
            .filter(|q| !held.contains(&q.candidate.ticker))
            .max_by(|a, b| a.candidate.score.cmp(&b.candidate.score))
            .map(|q| q.candidate.clone())
    }

    /// Remove a candidate after deploying into it and count it for the day.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn mark_deployed(&mut self, ticker: &str) -> Result<(), RedeployError> {
        self.doc.candidates.retain(|q| q.candidate.ticker != ticker);
        self.doc.deployed_today += 1;
        info!(
            ticker,
            deployed_today = self.doc.deployed_today,
            "Redeployment executed"
        );
        self.persist()
    }

    /// Drop a candidate that failed revalidation.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn remove(&mut self, ticker: &str) -> Result<(), RedeployError> {
        let before = self.doc.candidates.len();
        self.doc.candidates.retain(|q| q.candidate.ticker != ticker);
        if self.doc.candidates.len() != before {
            self.persist()?;
        }
        Ok(())
    }

    /// Drop candidates older than the TTL; their signals have gone stale.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<usize, RedeployError> {
        let cutoff = now - Duration::hours(self.config.candidate_ttl_hours);
        let before = self.doc.candidates.len();
        self.doc.candidates.retain(|q| q.queued_at >= cutoff);
        let dropped = before - self.doc.candidates.len();
        if dropped > 0 {
            debug!(dropped, "Expired stale redeployment candidates");
            self.persist()?;
        }
        Ok(dropped)
    }
}
