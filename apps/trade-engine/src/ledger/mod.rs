//! Order ledger.
//!
//! Durable record of every order the engine has placed, keyed by a
//! deterministic idempotency key (`TICKER-SIDE-YYYYMMDD`). The key doubles
//! as the broker `client_order_id`, so a crash between submit and persist is
//! recoverable by asking the broker for the key. At most one order may
//! occupy a (ticker, side) slot per day.

pub mod state_machine;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{map_broker_status, OrderAck};
use crate::models::{OrderSide, OrderStatus, SignalTier};
use crate::store::{JsonStore, StoreError};

pub use state_machine::InvalidTransition;

/// Ledger error.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An order already occupies this (ticker, side, day) slot.
    #[error("duplicate order {key} (existing status {existing})")]
    DuplicateOrder {
        /// Idempotency key of the existing order.
        key: String,
        /// Its current status.
        existing: OrderStatus,
    },

    /// No order under this key.
    #[error("unknown order {key}")]
    UnknownOrder {
        /// Requested key.
        key: String,
    },

    /// Illegal lifecycle move requested locally.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Idempotency key, also the broker `client_order_id`.
    pub client_order_id: String,
    /// Broker-assigned ID once submission succeeded.
    pub broker_order_id: Option<String>,
    /// Instrument ticker.
    pub ticker: String,
    /// Order side.
    pub side: OrderSide,
    /// Conviction tier carried from the candidate, for buys.
    #[serde(default)]
    pub tier: SignalTier,
    /// Signal score carried from the candidate; zero for exit sells.
    #[serde(default)]
    pub score: Decimal,
    /// Requested quantity.
    pub qty: Decimal,
    /// Limit price for limit orders.
    pub limit_price: Option<Decimal>,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_qty: Decimal,
    /// Average fill price over the filled quantity.
    pub filled_avg_price: Option<Decimal>,
    /// Failure or rejection detail.
    pub reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First broker acknowledgment time.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Full fill time.
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Change observed while applying a broker acknowledgment.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// The order fully filled.
    Filled(OrderRecord),
    /// More quantity filled, order still working.
    PartialFill(OrderRecord),
    /// The order terminated without (full) execution.
    Closed(OrderRecord),
}

impl OrderEvent {
    /// The record after the change.
    #[must_use]
    pub const fn record(&self) -> &OrderRecord {
        match self {
            Self::Filled(r) | Self::PartialFill(r) | Self::Closed(r) => r,
        }
    }
}

/// Build the idempotency key for a (ticker, side, day) slot.
#[must_use]
pub fn idempotency_key(ticker: &str, side: OrderSide, day: NaiveDate) -> String {
    format!("{}-{}-{}", ticker.to_uppercase(), side, day.format("%Y%m%d"))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDoc {
    orders: BTreeMap<String, OrderRecord>,
}

/// Durable order ledger.
#[derive(Debug)]
pub struct OrderLedger {
    doc: LedgerDoc,
    store: JsonStore,
}

impl OrderLedger {
    const DOC: &'static str = "orders";

    /// Load the ledger from the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the document exists but cannot be parsed.
    pub fn load(store: JsonStore) -> Result<Self, LedgerError> {
        let doc = store.load(Self::DOC)?;
        Ok(Self { doc, store })
    }

    fn persist(&self) -> Result<(), LedgerError> {
        self.store.save(Self::DOC, &self.doc)?;
        Ok(())
    }

    /// Look up an order by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OrderRecord> {
        self.doc.orders.get(key)
    }

    /// All orders still occupying their slot.
    #[must_use]
    pub fn active_orders(&self) -> Vec<OrderRecord> {
        self.doc
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .cloned()
            .collect()
    }

    /// Whether an active order exists for this (ticker, side).
    #[must_use]
    pub fn has_active(&self, ticker: &str, side: OrderSide) -> bool {
        self.doc
            .orders
            .values()
            .any(|o| o.ticker == ticker && o.side == side && o.status.is_active())
    }

    /// Create a `PendingSubmit` order for today's slot.
    ///
    /// A terminal order that never executed (failed, rejected, cancelled or
    /// expired) does not block the slot: its record is reset and the same
    /// client order ID is reused, so a retried exit resolves to the same
    /// logical order at the broker.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOrder` when the slot is held by an active order
    /// (today's or a still-active one from an earlier day) or by a fill.
    pub fn create_order(
        &mut self,
        ticker: &str,
        side: OrderSide,
        tier: SignalTier,
        score: Decimal,
        qty: Decimal,
        limit_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<OrderRecord, LedgerError> {
        let key = idempotency_key(ticker, side, now.date_naive());
        if let Some(existing) = self.doc.orders.get_mut(&key) {
            if existing.status.is_active() || existing.status == OrderStatus::Filled {
                return Err(LedgerError::DuplicateOrder {
                    key,
                    existing: existing.status,
                });
            }
            info!(key, prior = %existing.status, "Reopening day slot after unexecuted order");
            existing.broker_order_id = None;
            existing.tier = tier;
            existing.score = score;
            existing.qty = qty;
            existing.limit_price = limit_price;
            existing.status = OrderStatus::PendingSubmit;
            existing.filled_qty = Decimal::ZERO;
            existing.filled_avg_price = None;
            existing.reason = None;
            existing.created_at = now;
            existing.submitted_at = None;
            existing.filled_at = None;
            existing.updated_at = now;
            let record = existing.clone();
            self.persist()?;
            return Ok(record);
        }
        if let Some(active) = self
            .doc
            .orders
            .values()
            .find(|o| o.ticker == ticker && o.side == side && o.status.is_active())
        {
            return Err(LedgerError::DuplicateOrder {
                key: active.client_order_id.clone(),
                existing: active.status,
            });
        }

        let record = OrderRecord {
            client_order_id: key.clone(),
            broker_order_id: None,
            ticker: ticker.to_uppercase(),
            side,
            tier,
            score,
            qty,
            limit_price,
            status: OrderStatus::PendingSubmit,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            reason: None,
            created_at: now,
            submitted_at: None,
            filled_at: None,
            updated_at: now,
        };
        self.doc.orders.insert(key, record.clone());
        self.persist()?;
        Ok(record)
    }

    /// Record a broker acknowledgment for a submitted or polled order.
    ///
    /// Returns the change the ack produced, if any. A stale poll that would
    /// move the lifecycle backwards is logged and ignored; the ledger never
    /// regresses.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOrder` for an unrecognized key, or a persistence
    /// error.
    pub fn apply_ack(
        &mut self,
        key: &str,
        ack: &OrderAck,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderEvent>, LedgerError> {
        let record = self
            .doc
            .orders
            .get_mut(key)
            .ok_or_else(|| LedgerError::UnknownOrder {
                key: key.to_string(),
            })?;

        let next = map_broker_status(&ack.raw_status);
        let prior_status = record.status;
        let prior_filled = record.filled_qty;

        if next != prior_status && !state_machine::is_valid_transition(prior_status, next) {
            warn!(
                key,
                from = %prior_status,
                to = %next,
                raw = %ack.raw_status,
                "Ignoring stale broker status"
            );
            return Ok(None);
        }

        record.broker_order_id = Some(ack.broker_order_id.clone());
        if record.submitted_at.is_none() {
            record.submitted_at = Some(now);
        }
        record.status = next;
        if next == OrderStatus::Filled && prior_status != OrderStatus::Filled {
            record.filled_at = Some(now);
        }
        if ack.filled_qty > record.filled_qty {
            record.filled_qty = ack.filled_qty;
        }
        if ack.filled_avg_price.is_some() {
            record.filled_avg_price = ack.filled_avg_price;
        }
        record.updated_at = now;
        let updated = record.clone();
        self.persist()?;

        let event = match next {
            OrderStatus::Filled if prior_status != OrderStatus::Filled => {
                info!(key, qty = %updated.filled_qty, "Order filled");
                Some(OrderEvent::Filled(updated))
            }
            OrderStatus::PartiallyFilled if updated.filled_qty > prior_filled => {
                info!(key, filled = %updated.filled_qty, total = %updated.qty, "Partial fill");
                Some(OrderEvent::PartialFill(updated))
            }
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Expired
                if prior_status.is_active() =>
            {
                info!(key, status = %next, "Order closed without full execution");
                Some(OrderEvent::Closed(updated))
            }
            _ => None,
        };
        Ok(event)
    }

    /// Record that the submission call itself failed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOrder` for an unrecognized key, `Transition` when the
    /// order already left `PendingSubmit`, or a persistence error.
    pub fn mark_failed(
        &mut self,
        key: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let record = self
            .doc
            .orders
            .get_mut(key)
            .ok_or_else(|| LedgerError::UnknownOrder {
                key: key.to_string(),
            })?;
        record.status = state_machine::transition(record.status, OrderStatus::Failed)?;
        record.reason = Some(reason.to_string());
        record.updated_at = now;
        self.persist()?;
        Ok(())
    }

    /// Sweep active orders older than 24 hours to `Expired`.
    ///
    /// The broker side is left alone; a day order is already dead there and
    /// the sweep only releases the local slot.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<Vec<OrderRecord>, LedgerError> {
        let cutoff = now - Duration::hours(24);
        let mut expired = Vec::new();
        for record in self.doc.orders.values_mut() {
            if record.status.is_active() && record.created_at < cutoff {
                record.status = OrderStatus::Expired;
                record.updated_at = now;
                warn!(key = %record.client_order_id, "Order unresolved for 24h, expiring");
                expired.push(record.clone());
            }
        }
        if !expired.is_empty() {
            self.persist()?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> (OrderLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        (OrderLedger::load(store).unwrap(), dir)
    }

    fn ack(id: &str, key: &str, status: &str, filled: Decimal, price: Option<Decimal>) -> OrderAck {
        OrderAck {
            broker_order_id: id.to_string(),
            client_order_id: key.to_string(),
            raw_status: status.to_string(),
            filled_qty: filled,
            filled_avg_price: price,
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-08-26T14:30:00Z".parse().unwrap()
    }

    #[test]
    fn key_is_deterministic() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 26).unwrap();
        assert_eq!(
            idempotency_key("aapl", OrderSide::Buy, day),
            "AAPL-BUY-20260826"
        );
        assert_eq!(
            idempotency_key("MSFT", OrderSide::Sell, day),
            "MSFT-SELL-20260826"
        );
    }

    #[test]
    fn duplicate_same_day_is_rejected() {
        let (mut ledger, _dir) = ledger();
        ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        let err = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(10), None, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateOrder { .. }));
    }

    #[test]
    fn opposite_side_same_day_is_fine() {
        let (mut ledger, _dir) = ledger();
        ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        assert!(ledger
            .create_order("AAPL", OrderSide::Sell, SignalTier::C, dec!(0), dec!(33), None, now())
            .is_ok());
    }

    #[test]
    fn active_order_from_prior_day_blocks_slot() {
        let (mut ledger, _dir) = ledger();
        let yesterday: DateTime<Utc> = "2026-08-25T14:30:00Z".parse().unwrap();
        ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, yesterday)
            .unwrap();
        let err = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateOrder { .. }));
    }

    #[test]
    fn terminal_order_frees_the_next_day_slot() {
        let (mut ledger, _dir) = ledger();
        let yesterday: DateTime<Utc> = "2026-08-25T14:30:00Z".parse().unwrap();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, yesterday)
            .unwrap();
        ledger
            .apply_ack(
                &record.client_order_id,
                &ack("b1", &record.client_order_id, "filled", dec!(33), Some(dec!(150))),
                yesterday,
            )
            .unwrap();
        assert!(ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .is_ok());
    }

    #[test]
    fn market_order_fills_in_one_ack() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        let event = ledger
            .apply_ack(
                &record.client_order_id,
                &ack("b1", &record.client_order_id, "filled", dec!(33), Some(dec!(150.10))),
                now(),
            )
            .unwrap();
        assert!(matches!(event, Some(OrderEvent::Filled(_))));
        let stored = ledger.get(&record.client_order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.filled_avg_price, Some(dec!(150.10)));
        assert_eq!(stored.submitted_at, Some(now()));
        assert_eq!(stored.filled_at, Some(now()));
    }

    #[test]
    fn partial_fill_then_fill() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("MSFT", OrderSide::Buy, SignalTier::C, dec!(8), dec!(10), Some(dec!(400)), now())
            .unwrap();
        let key = record.client_order_id.clone();

        let event = ledger
            .apply_ack(&key, &ack("b1", &key, "partially_filled", dec!(4), Some(dec!(399.9))), now())
            .unwrap();
        assert!(matches!(event, Some(OrderEvent::PartialFill(_))));

        // Same partial state again with no new quantity: no event.
        let event = ledger
            .apply_ack(&key, &ack("b1", &key, "partially_filled", dec!(4), Some(dec!(399.9))), now())
            .unwrap();
        assert!(event.is_none());

        let event = ledger
            .apply_ack(&key, &ack("b1", &key, "filled", dec!(10), Some(dec!(399.95))), now())
            .unwrap();
        assert!(matches!(event, Some(OrderEvent::Filled(_))));
    }

    #[test]
    fn stale_backward_poll_is_ignored() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        let key = record.client_order_id.clone();
        ledger
            .apply_ack(&key, &ack("b1", &key, "filled", dec!(33), Some(dec!(150))), now())
            .unwrap();

        let event = ledger
            .apply_ack(&key, &ack("b1", &key, "accepted", dec!(0), None), now())
            .unwrap();
        assert!(event.is_none());
        assert_eq!(ledger.get(&key).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn filled_quantity_never_decreases() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        let key = record.client_order_id.clone();
        ledger
            .apply_ack(&key, &ack("b1", &key, "partially_filled", dec!(20), None), now())
            .unwrap();
        ledger
            .apply_ack(&key, &ack("b1", &key, "partially_filled", dec!(5), None), now())
            .unwrap();
        assert_eq!(ledger.get(&key).unwrap().filled_qty, dec!(20));
    }

    #[test]
    fn failed_submission() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        ledger
            .mark_failed(&record.client_order_id, "connection reset", now())
            .unwrap();
        let stored = ledger.get(&record.client_order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert_eq!(stored.reason.as_deref(), Some("connection reset"));
        // The slot is free again.
        assert!(!ledger.has_active("AAPL", OrderSide::Buy));
    }

    #[test]
    fn failed_slot_is_reusable_the_same_day() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Sell, SignalTier::C, dec!(0), dec!(33), None, now())
            .unwrap();
        ledger
            .mark_failed(&record.client_order_id, "connection reset", now())
            .unwrap();

        let retried = ledger
            .create_order("AAPL", OrderSide::Sell, SignalTier::C, dec!(0), dec!(33), None, now())
            .unwrap();
        assert_eq!(retried.client_order_id, record.client_order_id);
        assert_eq!(retried.status, OrderStatus::PendingSubmit);
        assert!(retried.reason.is_none());
    }

    #[test]
    fn filled_slot_stays_occupied_for_the_day() {
        let (mut ledger, _dir) = ledger();
        let record = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        let key = record.client_order_id.clone();
        ledger
            .apply_ack(&key, &ack("b1", &key, "filled", dec!(33), Some(dec!(150))), now())
            .unwrap();

        let err = ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateOrder { .. }));
    }

    #[test]
    fn stale_sweep_expires_only_old_active_orders() {
        let (mut ledger, _dir) = ledger();
        let old: DateTime<Utc> = "2026-08-24T14:30:00Z".parse().unwrap();
        ledger
            .create_order("OLD", OrderSide::Buy, SignalTier::C, dec!(8), dec!(1), None, old)
            .unwrap();
        ledger
            .create_order("NEW", OrderSide::Buy, SignalTier::C, dec!(8), dec!(1), None, now())
            .unwrap();

        let expired = ledger.expire_stale(now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ticker, "OLD");
        assert_eq!(
            ledger.get("NEW-BUY-20260826").unwrap().status,
            OrderStatus::PendingSubmit
        );
    }

    #[test]
    fn ledger_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let mut ledger = OrderLedger::load(store.clone()).unwrap();
        ledger
            .create_order("AAPL", OrderSide::Buy, SignalTier::C, dec!(9), dec!(33), None, now())
            .unwrap();
        drop(ledger);

        let reloaded = OrderLedger::load(store).unwrap();
        assert!(reloaded.has_active("AAPL", OrderSide::Buy));
    }
}
