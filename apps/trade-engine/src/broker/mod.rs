//! Broker gateway.
//!
//! Interface for account, clock, position, and order operations against the
//! brokerage. All calls may fail with transient-network, rate-limit, auth, or
//! not-found classes; callers branch on the class.

pub mod alpaca;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderStatus};

/// Account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Settled cash.
    pub cash: Decimal,
    /// Total portfolio value (cash + positions, marked to market).
    pub portfolio_value: Decimal,
    /// Buying power.
    pub buying_power: Decimal,
}

/// Market clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    /// Whether the market is currently open.
    pub is_open: bool,
    /// Next session open.
    pub next_open: DateTime<Utc>,
    /// Next session close.
    pub next_close: DateTime<Utc>,
}

/// One broker-side position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Instrument ticker.
    pub ticker: String,
    /// Signed share quantity.
    pub qty: Decimal,
    /// Average entry price.
    pub avg_entry_price: Decimal,
    /// Last traded price, when the broker supplies one.
    pub current_price: Option<Decimal>,
    /// Unrealized P&L, when the broker supplies one.
    pub unrealized_pnl: Option<Decimal>,
}

/// Tradeability verdict for an asset.
#[derive(Debug, Clone)]
pub struct AssetStatus {
    /// Whether orders may be placed for the asset.
    pub tradeable: bool,
    /// Reason when not tradeable (halted, inactive, unknown symbol).
    pub warning: Option<String>,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Valid for the trading day.
    Day,
    /// Good until cancelled.
    Gtc,
}

/// Request to submit an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    /// Client order ID; the ledger's idempotency key.
    pub client_order_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Share quantity.
    pub qty: Decimal,
    /// Limit price (limit orders only).
    pub limit_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl SubmitOrderRequest {
    /// Create a day market order.
    #[must_use]
    pub const fn market(
        client_order_id: String,
        ticker: String,
        side: OrderSide,
        qty: Decimal,
    ) -> Self {
        Self {
            client_order_id,
            ticker,
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Create a day limit order.
    #[must_use]
    pub const fn limit(
        client_order_id: String,
        ticker: String,
        side: OrderSide,
        qty: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            client_order_id,
            ticker,
            side,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(limit_price),
            time_in_force: TimeInForce::Day,
        }
    }
}

/// Acknowledgment from the broker for a submitted or polled order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Broker-assigned order ID.
    pub broker_order_id: String,
    /// Client order ID echoed back.
    pub client_order_id: String,
    /// Raw broker status string, preserved for audit.
    pub raw_status: String,
    /// Filled quantity so far.
    pub filled_qty: Decimal,
    /// Average fill price, once any quantity has filled.
    pub filled_avg_price: Option<Decimal>,
}

/// Map the broker status vocabulary into the order lifecycle.
///
/// Unknown statuses map to `Submitted` (fail-open): the order stays live and
/// keeps being polled rather than being silently dropped.
#[must_use]
pub fn map_broker_status(raw: &str) -> OrderStatus {
    match raw.to_lowercase().as_str() {
        "new" | "pending_new" => OrderStatus::Submitted,
        "accepted" | "accepted_for_bidding" | "replaced" | "pending_replace" => {
            OrderStatus::Accepted
        }
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "cancelled" | "pending_cancel" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        "expired" | "done_for_day" => OrderStatus::Expired,
        other => {
            tracing::warn!(status = other, "Unknown broker order status, treating as SUBMITTED");
            OrderStatus::Submitted
        }
    }
}

/// Broker gateway error classes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Transient network failure (retried internally, surfaced on exhaustion).
    #[error("broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Rate limited.
    #[error("rate limited by broker, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested retry delay in seconds.
        retry_after_secs: u64,
    },

    /// Authorization failure. Never retried.
    #[error("broker authorization failed")]
    Auth,

    /// Entity not found (order, position, asset). Never retried.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Order rejected by the broker.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Anything else.
    #[error("broker error: {message}")]
    Unknown {
        /// Error details.
        message: String,
    },
}

impl BrokerError {
    /// Whether the error class is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RateLimited { .. })
    }
}

/// Gateway to the brokerage.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Fetch the account snapshot.
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError>;

    /// Fetch the market clock.
    async fn get_clock(&self) -> Result<MarketClock, BrokerError>;

    /// Fetch all open positions.
    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Fetch one position; `None` when the broker holds no position.
    async fn get_position(&self, ticker: &str) -> Result<Option<BrokerPosition>, BrokerError>;

    /// Submit an order.
    async fn submit_order(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError>;

    /// Fetch order status by broker ID.
    async fn get_order(&self, broker_order_id: &str) -> Result<OrderAck, BrokerError>;

    /// Fetch order status by client order ID (idempotency key).
    async fn get_order_by_client_id(&self, client_order_id: &str)
        -> Result<OrderAck, BrokerError>;

    /// Cancel an order by broker ID.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Check whether an asset is tradeable.
    async fn is_asset_tradeable(&self, ticker: &str) -> Result<AssetStatus, BrokerError>;
}
