// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Trade Engine - Library
//!
//! Single-process order execution and position-consistency engine. Takes
//! externally-scored trade candidates, enforces portfolio and risk
//! constraints, submits and tracks broker orders, monitors open positions for
//! exit conditions, reconciles the local book against broker truth, and halts
//! new entries when daily loss thresholds are breached.
//!
//! # Structure
//!
//! - `broker`: `BrokerGateway` trait and the Alpaca adapter (retrying HTTP)
//! - `quotes`: fallback price source when the broker position feed has none
//! - `ledger`: order lifecycle tracking with idempotent submission
//! - `book`: position book with stop / target / trailing / time-based exits
//! - `breaker`: day-scoped circuit breaker (one-way latch)
//! - `reconcile`: local vs. broker position comparison and pre-market sync
//! - `redeploy`: same-day capital redeployment queue
//! - `engine`: the orchestrator sequencing the three daily passes
//! - `store`: JSON-document persistence with atomic writes + audit log
//!
//! The engine is invoked as discrete batch passes (`morning`, `monitor`,
//! `eod`); it is not a long-lived event loop, and exactly one instance may
//! run against a brokerage account at a time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Broker gateway trait, Alpaca adapter, and mock gateway.
pub mod broker;

/// Shared domain types (sides, statuses, tiers, candidates).
pub mod models;

/// Fallback quote source.
pub mod quotes;

/// Order lifecycle ledger.
pub mod ledger;

/// Position book and exit engine.
pub mod book;

/// Day-scoped circuit breaker.
pub mod breaker;

/// Position reconciliation against broker truth.
pub mod reconcile;

/// Capital redeployment queue.
pub mod redeploy;

/// Execution orchestrator.
pub mod engine;

/// Structured engine events and event sinks.
pub mod events;

/// JSON-document persistence.
pub mod store;

/// Engine settings from the environment.
pub mod config;

/// Tracing subscriber setup.
pub mod telemetry;

pub use broker::{
    AccountSnapshot, AssetStatus, BrokerError, BrokerGateway, BrokerPosition, MarketClock,
    OrderAck, SubmitOrderRequest,
};
pub use config::EngineSettings;
pub use engine::{Engine, EngineError, PassReport};
pub use events::{EngineEvent, EventSink};
pub use models::{OrderSide, OrderStatus, SignalTier, TradeCandidate};
