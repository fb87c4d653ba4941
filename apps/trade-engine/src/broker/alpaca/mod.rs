//! Alpaca Markets broker adapter.
//!
//! HTTP client with bounded exponential-backoff retry, fixed response
//! shapes validated at the boundary, and a `BrokerGateway` implementation.

mod adapter;
mod api_types;
mod config;
mod error;
mod http_client;

pub use adapter::AlpacaGateway;
pub use config::{AlpacaConfig, AlpacaEnvironment, RetryConfig};
pub use error::AlpacaError;

pub(crate) use http_client::HttpClient;
