//! Pass orchestration.
//!
//! Three scheduled passes and a read-only status check drive everything:
//!
//! - morning: reconcile against the broker, sweep stale orders, then enter
//!   validated candidates from the signal feed
//! - monitor: poll open orders, ratchet trailing stops, run the exit chain,
//!   and redeploy freed capital
//! - eod: final order sweep and the daily summary
//!
//! Exits keep running when the circuit breaker is halted; only entries and
//! redeployments stop. Every pass is safe to re-run: order submission is
//! idempotent through the ledger and everything persists before returning.

pub mod validate;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::book::{BookConfig, BookError, ExitSignal, PositionBook};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::broker::{
    AccountSnapshot, BrokerError, BrokerGateway, BrokerPosition, MarketClock, SubmitOrderRequest,
};
use crate::config::{EngineSettings, RiskLimits};
use crate::events::{EngineEvent, EventSink, FillFact};
use crate::ledger::{LedgerError, OrderEvent, OrderLedger, OrderRecord};
use crate::models::{OrderSide, OrderStatus, TradeCandidate};
use crate::quotes::QuoteFeed;
use crate::reconcile::{self, Discrepancy};
use crate::redeploy::{RedeployConfig, RedeployError, RedeploymentQueue};
use crate::store::{JsonStore, StoreError};

pub use validate::{validate, ValidationContext, Verdict};

/// Engine failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Broker call failed after retries.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Position book failure.
    #[error(transparent)]
    Book(#[from] BookError),

    /// Circuit breaker failure.
    #[error(transparent)]
    Breaker(#[from] BreakerError),

    /// Redeployment queue failure.
    #[error(transparent)]
    Redeploy(#[from] RedeployError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The signal feed exists but cannot be read or parsed.
    #[error("signal feed error: {0}")]
    Signals(String),
}

/// Time source, injected so tests control the clock.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Account snapshot cache; passes hit the account endpoint often enough that
/// a short TTL saves most of the calls.
struct AccountCache {
    ttl: Duration,
    fetched_at: Option<DateTime<Utc>>,
    snapshot: Option<AccountSnapshot>,
}

impl AccountCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            fetched_at: None,
            snapshot: None,
        }
    }

    fn get(&self, now: DateTime<Utc>) -> Option<AccountSnapshot> {
        let fetched_at = self.fetched_at?;
        if now - fetched_at < self.ttl {
            self.snapshot.clone()
        } else {
            None
        }
    }

    fn put(&mut self, now: DateTime<Utc>, snapshot: AccountSnapshot) {
        self.fetched_at = Some(now);
        self.snapshot = Some(snapshot);
    }
}

/// What one pass did.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Whether the market was open.
    pub market_open: bool,
    /// Whether the breaker was halted at the end of the pass.
    pub halted: bool,
    /// Entry orders handed to the broker.
    pub entries_submitted: usize,
    /// Exit orders handed to the broker.
    pub exits_executed: usize,
    /// Candidates parked in the redeployment queue.
    pub queued: usize,
    /// Redeployments executed.
    pub redeployed: usize,
    /// Capital freed by completed exits during this pass.
    pub freed_capital: Decimal,
    /// Reconciliation discrepancies left unresolved.
    pub unresolved_discrepancies: usize,
    /// Fills observed during the pass.
    pub fills: Vec<FillFact>,
    /// Human-readable notes.
    pub notes: Vec<String>,
}

/// One position in the status output.
#[derive(Debug, Serialize)]
pub struct PositionStatus {
    /// Ticker.
    pub ticker: String,
    /// Shares held.
    pub qty: Decimal,
    /// Average entry.
    pub entry_price: Decimal,
    /// Hard stop.
    pub stop_price: Decimal,
    /// Profit target.
    pub target_price: Decimal,
    /// Trailing stop, if active.
    pub trailing_stop: Option<Decimal>,
    /// Latest price, if a quote exists.
    pub current_price: Option<Decimal>,
    /// Unrealized P&L at the latest price.
    pub unrealized_pnl: Option<Decimal>,
}

/// Read-only snapshot for the status command.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Whether the market is open.
    pub market_open: bool,
    /// Account snapshot.
    pub account: AccountSnapshot,
    /// Open positions with live marks.
    pub positions: Vec<PositionStatus>,
    /// Orders still working.
    pub active_orders: Vec<OrderRecord>,
    /// Whether the breaker is halted.
    pub halted: bool,
    /// Halt reason, when halted.
    pub halt_reason: Option<String>,
    /// Day's equity-based P&L at the last check.
    pub daily_pnl: Decimal,
    /// Candidates waiting for freed capital.
    pub queued_candidates: usize,
    /// Discrepancies against the broker (reported, not corrected).
    pub discrepancies: Vec<Discrepancy>,
}

/// The trade engine.
pub struct Engine {
    broker: Arc<dyn BrokerGateway>,
    quotes: Arc<dyn QuoteFeed>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ledger: OrderLedger,
    book: PositionBook,
    breaker: CircuitBreaker,
    queue: RedeploymentQueue,
    limits: RiskLimits,
    trading_enabled: bool,
    redeploy_enabled: bool,
    signals_file: PathBuf,
    account_cache: AccountCache,
}

impl Engine {
    /// Assemble the engine, loading all durable state from the data
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error when any state document exists but cannot be parsed.
    pub fn new(
        settings: &EngineSettings,
        broker: Arc<dyn BrokerGateway>,
        quotes: Arc<dyn QuoteFeed>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let store = JsonStore::open(&settings.data_dir)?;
        let ledger = OrderLedger::load(store.clone())?;
        let book = PositionBook::load(store.clone(), BookConfig::default())?;
        let breaker = CircuitBreaker::load(store.clone(), &settings.limits)?;
        let queue = RedeploymentQueue::load(store, RedeployConfig::default())?;
        Ok(Self {
            broker,
            quotes,
            events,
            clock,
            ledger,
            book,
            breaker,
            queue,
            limits: settings.limits.clone(),
            trading_enabled: settings.trading_enabled,
            redeploy_enabled: settings.redeploy_enabled,
            signals_file: settings.signals_file.clone(),
            account_cache: AccountCache::new(Duration::seconds(60)),
        })
    }

    async fn account(&mut self, now: DateTime<Utc>) -> Result<AccountSnapshot, EngineError> {
        if let Some(snapshot) = self.account_cache.get(now) {
            return Ok(snapshot);
        }
        self.fresh_account(now).await
    }

    async fn fresh_account(&mut self, now: DateTime<Utc>) -> Result<AccountSnapshot, EngineError> {
        let snapshot = self.broker.get_account().await?;
        self.account_cache.put(now, snapshot.clone());
        Ok(snapshot)
    }

    /// Morning pass: reconcile, sweep, and enter the day's candidates.
    ///
    /// A closed market is a clean no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on unrecoverable broker or persistence failure.
    pub async fn run_morning(&mut self) -> Result<PassReport, EngineError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut report = PassReport::default();

        let clock = self.broker.get_clock().await?;
        report.market_open = clock.is_open;
        if !clock.is_open {
            info!(next_open = %clock.next_open, "Market closed, morning pass is a no-op");
            return Ok(report);
        }

        let account = self.fresh_account(now).await?;
        self.breaker.roll_date(today, account.portfolio_value)?;
        self.queue.roll_date(today)?;

        // Sweep only after the poll so an order that filled overnight is
        // absorbed rather than expired.
        let events = self.poll_open_orders(now).await?;
        self.absorb_order_events(events, now, &mut report)?;

        for record in self.ledger.expire_stale(now)? {
            report
                .notes
                .push(format!("expired stale order {}", record.client_order_id));
        }
        self.queue.expire_stale(now)?;

        let broker_positions = self.broker.get_all_positions().await?;
        let recon = reconcile::sync_with_broker(
            &mut self.book,
            &self.ledger,
            &broker_positions,
            true,
            today,
        )?;
        report.unresolved_discrepancies = recon.unresolved;
        if recon.is_clean() {
            self.events.publish(EngineEvent::ReconciliationCompleted {
                corrected: recon.corrected,
            });
        } else {
            self.events.publish(EngineEvent::ReconciliationFailed {
                discrepancies: recon.unresolved,
            });
            report.notes.push(format!(
                "{} reconciliation discrepancies unresolved",
                recon.unresolved
            ));
        }

        let halted = self.check_breaker(account.portfolio_value)?;
        report.halted = halted;

        if !self.trading_enabled {
            report.notes.push("trading disabled".to_string());
        } else if halted {
            report.notes.push("entries halted by breaker".to_string());
        } else {
            // Best scores first, so limited cash goes to the strongest signals.
            let mut candidates = self.read_signals()?;
            candidates.sort_by(|a, b| b.score.cmp(&a.score));
            info!(count = candidates.len(), "Evaluating signal candidates");
            let mut cash = account.cash;
            for candidate in candidates {
                self.consider_entry(candidate, account.portfolio_value, &mut cash, now, &mut report)
                    .await?;
            }
        }

        self.publish_fills(&report);
        report.halted = self.breaker.is_halted();
        Ok(report)
    }

    /// Monitor pass: poll orders, ratchet stops, run the exit chain,
    /// redeploy freed capital.
    ///
    /// # Errors
    ///
    /// Returns an error on unrecoverable broker or persistence failure.
    pub async fn run_monitor(&mut self) -> Result<PassReport, EngineError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut report = PassReport::default();

        let clock = self.broker.get_clock().await?;
        report.market_open = clock.is_open;
        if !clock.is_open {
            info!("Market closed, monitor pass is a no-op");
            return Ok(report);
        }

        let account = self.account(now).await?;
        self.breaker.roll_date(today, account.portfolio_value)?;
        self.queue.roll_date(today)?;

        let events = self.poll_open_orders(now).await?;
        self.absorb_order_events(events, now, &mut report)?;

        let broker_positions = self.broker.get_all_positions().await?;
        let prices = self.mark_prices(&broker_positions).await;
        self.book.update_trailing_stops(&prices)?;

        let halted = self.check_breaker(account.portfolio_value)?;
        report.halted = halted;

        // Exits run regardless of the halt.
        let signals = self.book.check_exits(&prices, today);
        for signal in signals {
            self.execute_exit(&signal, now, &mut report).await?;
        }

        if self.redeploy_enabled
            && !self.breaker.is_halted()
            && report.freed_capital > Decimal::ZERO
        {
            self.try_redeploy(report.freed_capital, &clock, now, &mut report)
                .await?;
        }

        self.publish_fills(&report);
        report.halted = self.breaker.is_halted();
        Ok(report)
    }

    /// End-of-day pass: final order sweep and the daily summary.
    ///
    /// Runs whether or not the market is still open.
    ///
    /// # Errors
    ///
    /// Returns an error on unrecoverable broker or persistence failure.
    pub async fn run_eod(&mut self) -> Result<PassReport, EngineError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut report = PassReport::default();

        let events = self.poll_open_orders(now).await?;
        self.absorb_order_events(events, now, &mut report)?;

        for record in self.ledger.expire_stale(now)? {
            report
                .notes
                .push(format!("expired stale order {}", record.client_order_id));
        }
        self.queue.expire_stale(now)?;

        let account = self.fresh_account(now).await?;
        self.breaker.roll_date(today, account.portfolio_value)?;
        let halted = self.check_breaker(account.portfolio_value)?;
        report.halted = halted;

        let exits = self.book.exits_today().len();
        let realized_pnl: Decimal = self
            .book
            .exits_today()
            .iter()
            .map(|e| e.realized_pnl)
            .sum();
        let daily_pnl = self.breaker.state().daily_pnl;
        info!(
            date = %today,
            daily_pnl = %daily_pnl,
            realized_pnl = %realized_pnl,
            portfolio_value = %account.portfolio_value,
            open_positions = self.book.len(),
            exits,
            halted,
            "Daily summary"
        );
        self.events.publish(EngineEvent::DailySummary {
            date: today.format("%Y-%m-%d").to_string(),
            daily_pnl,
            realized_pnl,
            portfolio_value: account.portfolio_value,
            open_positions: self.book.len(),
            exits,
        });
        self.book.clear_exits()?;

        self.publish_fills(&report);
        Ok(report)
    }

    /// Read-only status snapshot; reports discrepancies without correcting.
    ///
    /// # Errors
    ///
    /// Returns an error on broker failure.
    pub async fn status(&mut self) -> Result<StatusReport, EngineError> {
        let now = self.clock.now();
        let clock = self.broker.get_clock().await?;
        let account = self.fresh_account(now).await?;
        let broker_positions = self.broker.get_all_positions().await?;
        let discrepancies = reconcile::compare(&self.book.positions(), &broker_positions);

        let prices = self.mark_prices(&broker_positions).await;
        let positions = self
            .book
            .positions()
            .into_iter()
            .map(|p| {
                let current_price = prices.get(&p.ticker).copied();
                let unrealized_pnl = current_price.map(|c| (c - p.entry_price) * p.qty);
                PositionStatus {
                    ticker: p.ticker,
                    qty: p.qty,
                    entry_price: p.entry_price,
                    stop_price: p.stop_price,
                    target_price: p.target_price,
                    trailing_stop: p.trailing_stop,
                    current_price,
                    unrealized_pnl,
                }
            })
            .collect();

        let state = self.breaker.state();
        Ok(StatusReport {
            market_open: clock.is_open,
            account,
            positions,
            active_orders: self.ledger.active_orders(),
            halted: state.halted,
            halt_reason: state.halt_reason.clone(),
            daily_pnl: state.daily_pnl,
            queued_candidates: self.queue.len(),
            discrepancies,
        })
    }

    /// Current marks for held tickers. The broker's position feed is the
    /// primary source; the quote feed fills in anything it did not price.
    async fn mark_prices(&self, broker_positions: &[BrokerPosition]) -> HashMap<String, Decimal> {
        let mut prices: HashMap<String, Decimal> = broker_positions
            .iter()
            .filter_map(|p| p.current_price.map(|c| (p.ticker.clone(), c)))
            .collect();
        let missing: Vec<String> = self
            .book
            .tickers()
            .into_iter()
            .filter(|t| !prices.contains_key(t))
            .collect();
        if !missing.is_empty() {
            prices.extend(self.quotes.latest_prices(&missing).await);
        }
        prices
    }

    /// Poll the broker for every active order.
    ///
    /// Orders with a broker ID are polled by it; a `PendingSubmit` order
    /// without one is looked up by its client order ID, and a not-found
    /// answer there means the submission never reached the broker.
    async fn poll_open_orders(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, EngineError> {
        let mut events = Vec::new();
        for order in self.ledger.active_orders() {
            let key = order.client_order_id.clone();
            let result = match &order.broker_order_id {
                Some(id) => self.broker.get_order(id).await,
                None => self.broker.get_order_by_client_id(&key).await,
            };
            match result {
                Ok(ack) => {
                    if let Some(event) = self.ledger.apply_ack(&key, &ack, now)? {
                        events.push(event);
                    }
                }
                Err(BrokerError::NotFound { .. })
                    if order.status == OrderStatus::PendingSubmit =>
                {
                    self.ledger
                        .mark_failed(&key, "order never reached the broker", now)?;
                }
                Err(err) if err.is_transient() => {
                    warn!(key, error = %err, "Order poll failed, will retry next pass");
                }
                Err(err) => {
                    warn!(key, error = %err, "Order poll failed");
                }
            }
        }
        Ok(events)
    }

    /// Fold order events into the book, the breaker, and the report.
    fn absorb_order_events(
        &mut self,
        events: Vec<OrderEvent>,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        for event in events {
            match event {
                OrderEvent::Filled(record) => self.absorb_fill(&record, now, report)?,
                OrderEvent::PartialFill(record) => {
                    if let Some(price) = record.filled_avg_price {
                        report.fills.push(FillFact {
                            ticker: record.ticker.clone(),
                            side: record.side.to_string(),
                            qty: record.filled_qty,
                            price,
                        });
                    }
                }
                OrderEvent::Closed(record) => {
                    if record.side == OrderSide::Sell && self.book.get(&record.ticker).is_some() {
                        // The sell died; re-arm the exit chain for the ticker.
                        self.book.set_pending_exit(&record.ticker, None)?;
                    }
                    report.notes.push(format!(
                        "order {} closed as {}",
                        record.client_order_id, record.status
                    ));
                }
            }
        }
        Ok(())
    }

    fn absorb_fill(
        &mut self,
        record: &OrderRecord,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let Some(price) = record.filled_avg_price.or(record.limit_price) else {
            warn!(key = %record.client_order_id, "Fill without a price, cannot update the book");
            return Ok(());
        };
        report.fills.push(FillFact {
            ticker: record.ticker.clone(),
            side: record.side.to_string(),
            qty: record.filled_qty,
            price,
        });

        match record.side {
            OrderSide::Buy => {
                if self.book.get(&record.ticker).is_none() {
                    self.book.open_position(
                        &record.ticker,
                        record.filled_qty,
                        price,
                        record.tier,
                        record.score,
                        None,
                        now.date_naive(),
                    )?;
                }
            }
            OrderSide::Sell => {
                let Some(position) = self.book.get(&record.ticker).cloned() else {
                    return Ok(());
                };
                let Some(reason) = position.pending_exit else {
                    warn!(
                        ticker = %record.ticker,
                        "Sell filled without a pending exit, dropping position"
                    );
                    self.book.remove(&record.ticker)?;
                    return Ok(());
                };
                let exit = self
                    .book
                    .close_position(&record.ticker, price, reason, now)?;
                report.exits_executed += 1;
                report.freed_capital += exit.exit_price * exit.qty;
                let was_halted = self.breaker.is_halted();
                self.breaker.record_trade(exit.realized_pnl)?;
                if self.breaker.is_halted() && !was_halted {
                    self.publish_trip();
                }
                self.events.publish(EngineEvent::PositionClosed {
                    ticker: exit.ticker.clone(),
                    reason: exit.reason.to_string(),
                    realized_pnl: exit.realized_pnl,
                });
            }
        }
        Ok(())
    }

    fn check_breaker(&mut self, equity: Decimal) -> Result<bool, EngineError> {
        let was_halted = self.breaker.is_halted();
        let halted = self.breaker.check_equity(equity)?;
        if halted && !was_halted {
            self.publish_trip();
        }
        Ok(halted)
    }

    fn publish_trip(&self) {
        let state = self.breaker.state();
        self.events.publish(EngineEvent::CircuitBreakerTripped {
            reason: state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            daily_pnl: state.daily_pnl,
        });
    }

    fn publish_fills(&self, report: &PassReport) {
        if !report.fills.is_empty() {
            self.events.publish(EngineEvent::TradeExecuted {
                fills: report.fills.clone(),
            });
        }
    }

    /// Load candidates from the signal feed. A missing file is an empty day.
    fn read_signals(&self) -> Result<Vec<TradeCandidate>, EngineError> {
        let raw = match std::fs::read_to_string(&self.signals_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.signals_file.display(), "No signal feed today");
                return Ok(Vec::new());
            }
            Err(e) => return Err(EngineError::Signals(e.to_string())),
        };
        serde_json::from_str(&raw).map_err(|e| EngineError::Signals(e.to_string()))
    }

    async fn consider_entry(
        &mut self,
        candidate: TradeCandidate,
        portfolio_value: Decimal,
        cash: &mut Decimal,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let ctx = self.build_context(&candidate, portfolio_value, *cash).await;
        match validate(&candidate, &self.limits, &ctx) {
            Verdict::Reject { reason } => {
                info!(ticker = %candidate.ticker, reason, "Candidate rejected");
            }
            Verdict::Queue { reason } => {
                info!(ticker = %candidate.ticker, reason, "Candidate queued");
                self.queue.push(candidate, now)?;
                report.queued += 1;
            }
            Verdict::Accept { qty } => {
                if let Some(price) = ctx.current_price {
                    *cash -= qty * price;
                }
                self.submit_entry(&candidate, qty, now, report).await?;
            }
        }
        Ok(())
    }

    async fn build_context(
        &mut self,
        candidate: &TradeCandidate,
        portfolio_value: Decimal,
        cash: Decimal,
    ) -> ValidationContext {
        let current_price = match self.quotes.latest_price(&candidate.ticker).await {
            Ok(price) => price,
            Err(err) => {
                warn!(ticker = %candidate.ticker, error = %err, "Quote lookup failed");
                None
            }
        };
        let tradeable = match self.broker.is_asset_tradeable(&candidate.ticker).await {
            Ok(status) => {
                if let Some(warning) = &status.warning {
                    warn!(ticker = %candidate.ticker, warning, "Asset check");
                }
                status.tradeable
            }
            Err(err) => {
                warn!(ticker = %candidate.ticker, error = %err, "Asset check failed");
                false
            }
        };
        ValidationContext {
            portfolio_value,
            cash,
            open_positions: self.book.len(),
            held: self.book.tickers(),
            has_active_buy: self.ledger.has_active(&candidate.ticker, OrderSide::Buy),
            current_price,
            tradeable,
        }
    }

    async fn submit_entry(
        &mut self,
        candidate: &TradeCandidate,
        qty: Decimal,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let record = match self.ledger.create_order(
            &candidate.ticker,
            OrderSide::Buy,
            candidate.tier,
            candidate.score,
            qty,
            None,
            now,
        ) {
            Ok(record) => record,
            Err(LedgerError::DuplicateOrder { key, existing }) => {
                warn!(key, status = %existing, "Entry slot already occupied, skipping");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let key = record.client_order_id.clone();
        self.events.publish(EngineEvent::OrderSubmitted {
            client_order_id: key.clone(),
            ticker: record.ticker.clone(),
            side: record.side.to_string(),
            qty,
        });

        let request =
            SubmitOrderRequest::market(key.clone(), record.ticker.clone(), OrderSide::Buy, qty);
        self.settle_submission(&key, request, now, report).await?;
        report.entries_submitted += 1;
        Ok(())
    }

    /// Submit and record the outcome. On an ambiguous transient failure the
    /// broker is asked for the key once; if it knows nothing, the order is
    /// marked failed, otherwise the ack stands.
    async fn settle_submission(
        &mut self,
        key: &str,
        request: SubmitOrderRequest,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        match self.broker.submit_order(request).await {
            Ok(ack) => {
                if let Some(event) = self.ledger.apply_ack(key, &ack, now)? {
                    self.absorb_order_events(vec![event], now, report)?;
                }
            }
            Err(err) if err.is_transient() => {
                warn!(key, error = %err, "Submission outcome ambiguous, probing by client order ID");
                match self.broker.get_order_by_client_id(key).await {
                    Ok(ack) => {
                        if let Some(event) = self.ledger.apply_ack(key, &ack, now)? {
                            self.absorb_order_events(vec![event], now, report)?;
                        }
                    }
                    Err(BrokerError::NotFound { .. }) => {
                        self.ledger.mark_failed(key, &err.to_string(), now)?;
                    }
                    Err(probe_err) => {
                        warn!(key, error = %probe_err, "Probe failed, order left for the next poll");
                    }
                }
            }
            Err(err) => {
                warn!(key, error = %err, "Submission rejected");
                self.ledger.mark_failed(key, &err.to_string(), now)?;
            }
        }
        Ok(())
    }

    /// Submit the sell for an exit signal and mark the position pending.
    async fn execute_exit(
        &mut self,
        signal: &ExitSignal,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let Some(position) = self.book.get(&signal.ticker).cloned() else {
            return Ok(());
        };
        let record = match self.ledger.create_order(
            &signal.ticker,
            OrderSide::Sell,
            position.tier,
            Decimal::ZERO,
            position.qty,
            None,
            now,
        ) {
            Ok(record) => record,
            Err(LedgerError::DuplicateOrder { key, existing }) => {
                warn!(key, status = %existing, "Exit already in flight");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let key = record.client_order_id.clone();
        info!(
            ticker = %signal.ticker,
            reason = %signal.reason,
            price = %signal.price,
            "Exit triggered"
        );
        self.book
            .set_pending_exit(&signal.ticker, Some(signal.reason))?;
        self.events.publish(EngineEvent::OrderSubmitted {
            client_order_id: key.clone(),
            ticker: signal.ticker.clone(),
            side: OrderSide::Sell.to_string(),
            qty: position.qty,
        });

        let request = SubmitOrderRequest::market(
            key.clone(),
            signal.ticker.clone(),
            OrderSide::Sell,
            position.qty,
        );
        self.settle_submission(&key, request, now, report).await?;

        // A failed submission releases the pending marker so the next cycle
        // can try again.
        if self
            .ledger
            .get(&key)
            .is_some_and(|o| o.status == OrderStatus::Failed)
        {
            self.book.set_pending_exit(&signal.ticker, None)?;
        }
        Ok(())
    }

    /// Rotate freed capital into the best queued candidate.
    async fn try_redeploy(
        &mut self,
        freed_capital: Decimal,
        clock: &MarketClock,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        if let Err(block) = self.queue.can_redeploy(freed_capital, clock, now) {
            info!(?block, freed = %freed_capital, "Redeployment blocked");
            return Ok(());
        }
        let held = self.book.tickers();
        let Some(candidate) = self.queue.best_candidate(&held, self.limits.min_score) else {
            return Ok(());
        };

        let account = self.account(now).await?;
        let ctx = self
            .build_context(&candidate, account.portfolio_value, account.cash)
            .await;
        match validate(&candidate, &self.limits, &ctx) {
            Verdict::Accept { qty } => {
                let deployed = ctx.current_price.map_or(Decimal::ZERO, |p| qty * p);
                self.submit_entry(&candidate, qty, now, report).await?;
                self.queue.mark_deployed(&candidate.ticker)?;
                self.events.publish(EngineEvent::RedeploymentExecuted {
                    ticker: candidate.ticker.clone(),
                    deployed,
                });
                report.redeployed += 1;
            }
            Verdict::Queue { reason } => {
                info!(ticker = %candidate.ticker, reason, "Redeployment deferred");
            }
            Verdict::Reject { reason } => {
                info!(ticker = %candidate.ticker, reason, "Queued candidate no longer valid, dropping");
                self.queue.remove(&candidate.ticker)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_cache_expires() {
        let mut cache = AccountCache::new(Duration::seconds(60));
        let t0: DateTime<Utc> = "2026-08-26T14:00:00Z".parse().unwrap();
        let snapshot = AccountSnapshot {
            cash: Decimal::new(1000, 0),
            portfolio_value: Decimal::new(5000, 0),
            buying_power: Decimal::new(2000, 0),
        };
        cache.put(t0, snapshot);

        assert!(cache.get(t0 + Duration::seconds(59)).is_some());
        assert!(cache.get(t0 + Duration::seconds(60)).is_none());
    }

    #[test]
    fn empty_cache_misses() {
        let cache = AccountCache::new(Duration::seconds(60));
        assert!(cache.get(Utc::now()).is_none());
    }
}
