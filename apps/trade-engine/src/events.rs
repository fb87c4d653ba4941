//! Engine event stream.
//!
//! Every significant action emits one event. Events are notification-only:
//! a sink failure is logged and never blocks the pass that emitted it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::store::JsonStore;

/// One fill inside a trade execution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillFact {
    /// Instrument ticker.
    pub ticker: String,
    /// Order side, `BUY` or `SELL`.
    pub side: String,
    /// Shares filled.
    pub qty: Decimal,
    /// Average fill price.
    pub price: Decimal,
}

/// Events emitted by engine passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An order was handed to the broker.
    OrderSubmitted {
        /// Idempotency key.
        client_order_id: String,
        /// Instrument ticker.
        ticker: String,
        /// Order side.
        side: String,
        /// Requested quantity.
        qty: Decimal,
    },
    /// One or more orders reached a fill during a pass.
    TradeExecuted {
        /// All fills observed in the pass.
        fills: Vec<FillFact>,
    },
    /// A position was closed by an exit rule.
    PositionClosed {
        /// Instrument ticker.
        ticker: String,
        /// Exit rule that fired.
        reason: String,
        /// Realized profit or loss.
        realized_pnl: Decimal,
    },
    /// The circuit breaker halted trading.
    CircuitBreakerTripped {
        /// Why the breaker tripped.
        reason: String,
        /// Day's P&L at the time of the trip.
        daily_pnl: Decimal,
    },
    /// Reconciliation found discrepancies it could not correct.
    ReconciliationFailed {
        /// Count of unresolved discrepancies.
        discrepancies: usize,
    },
    /// Reconciliation finished clean or fully corrected.
    ReconciliationCompleted {
        /// Count of discrepancies that were corrected.
        corrected: usize,
    },
    /// Freed capital was redeployed into a queued candidate.
    RedeploymentExecuted {
        /// Ticker entered.
        ticker: String,
        /// Capital deployed.
        deployed: Decimal,
    },
    /// End-of-day summary.
    DailySummary {
        /// Trading date, `YYYY-MM-DD`.
        date: String,
        /// Realized plus unrealized P&L for the day.
        daily_pnl: Decimal,
        /// Realized P&L from the day's completed exits.
        realized_pnl: Decimal,
        /// Portfolio value at the close.
        portfolio_value: Decimal,
        /// Positions still open at the close.
        open_positions: usize,
        /// Positions exited during the day.
        exits: usize,
    },
}

/// A timestamped event as written to the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID, for correlating audit lines.
    pub id: Uuid,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
    /// The event.
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Destination for engine events.
pub trait EventSink: Send + Sync {
    /// Record one event. Implementations swallow their own failures.
    fn publish(&self, event: EngineEvent);
}

/// Sink that appends events to the store's audit log.
pub struct AuditSink {
    store: JsonStore,
}

impl AuditSink {
    /// Create a sink writing into `store`.
    #[must_use]
    pub const fn new(store: JsonStore) -> Self {
        Self { store }
    }
}

impl EventSink for AuditSink {
    fn publish(&self, event: EngineEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            at: Utc::now(),
            event,
        };
        if let Err(err) = self.store.append_audit(&envelope) {
            error!(error = %err, "Failed to write audit event");
        }
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: EngineEvent) {}
}
