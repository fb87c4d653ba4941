//! Alpaca REST wire types.
//!
//! Fixed response shapes; decimal fields arrive as JSON strings and are
//! deserialized into `Decimal` at the boundary so a malformed payload fails
//! here instead of deep inside the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::{
    AccountSnapshot, BrokerPosition, MarketClock, OrderAck, OrderType, SubmitOrderRequest,
    TimeInForce,
};

/// Order submission payload (`POST /v2/orders`).
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequestBody {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    pub client_order_id: String,
}

impl From<&SubmitOrderRequest> for OrderRequestBody {
    fn from(req: &SubmitOrderRequest) -> Self {
        Self {
            symbol: req.ticker.clone(),
            qty: req.qty.to_string(),
            side: req.side.as_str().to_string(),
            order_type: match req.order_type {
                OrderType::Market => "market".to_string(),
                OrderType::Limit => "limit".to_string(),
            },
            time_in_force: match req.time_in_force {
                TimeInForce::Day => "day".to_string(),
                TimeInForce::Gtc => "gtc".to_string(),
            },
            limit_price: req.limit_price.map(|p| p.to_string()),
            client_order_id: req.client_order_id.clone(),
        }
    }
}

/// Order payload (`POST /v2/orders`, `GET /v2/orders/{id}`).
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBody {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub filled_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_avg_price: Option<Decimal>,
}

impl OrderBody {
    pub fn into_ack(self) -> OrderAck {
        OrderAck {
            broker_order_id: self.id,
            client_order_id: self.client_order_id,
            raw_status: self.status,
            filled_qty: self.filled_qty,
            filled_avg_price: self.filled_avg_price,
        }
    }
}

/// Account payload (`GET /v2/account`).
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBody {
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub portfolio_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub buying_power: Decimal,
}

impl From<AccountBody> for AccountSnapshot {
    fn from(body: AccountBody) -> Self {
        Self {
            cash: body.cash,
            portfolio_value: body.portfolio_value,
            buying_power: body.buying_power,
        }
    }
}

/// Clock payload (`GET /v2/clock`).
#[derive(Debug, Clone, Deserialize)]
pub struct ClockBody {
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

impl From<ClockBody> for MarketClock {
    fn from(body: ClockBody) -> Self {
        Self {
            is_open: body.is_open,
            next_open: body.next_open,
            next_close: body.next_close,
        }
    }
}

/// Position payload (`GET /v2/positions`, `GET /v2/positions/{symbol}`).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionBody {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_entry_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub current_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub unrealized_pl: Option<Decimal>,
}

impl From<PositionBody> for BrokerPosition {
    fn from(body: PositionBody) -> Self {
        Self {
            ticker: body.symbol,
            qty: body.qty,
            avg_entry_price: body.avg_entry_price,
            current_price: body.current_price,
            unrealized_pnl: body.unrealized_pl,
        }
    }
}

/// Asset payload (`GET /v2/assets/{symbol}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBody {
    pub symbol: String,
    pub status: String,
    pub tradable: bool,
}

/// Error payload returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}
