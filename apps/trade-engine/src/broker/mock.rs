//! Scriptable in-memory broker for tests and dry runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use super::{
    AccountSnapshot, AssetStatus, BrokerError, BrokerGateway, BrokerPosition, MarketClock,
    OrderAck, SubmitOrderRequest,
};

struct MockState {
    account: AccountSnapshot,
    market_open: bool,
    positions: HashMap<String, BrokerPosition>,
    orders: HashMap<String, OrderAck>,
    client_index: HashMap<String, String>,
    submitted: Vec<SubmitOrderRequest>,
    submit_failures: VecDeque<BrokerError>,
    fill_status: String,
    fill_prices: HashMap<String, Decimal>,
    untradeable: HashSet<String>,
    next_id: u64,
}

/// In-memory `BrokerGateway`.
///
/// By default the market is open, the account holds $100,000, and submitted
/// orders acknowledge as `filled` at the scripted price (falling back to the
/// limit price, then $100).
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create a gateway with default state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                account: AccountSnapshot {
                    cash: Decimal::new(100_000, 0),
                    portfolio_value: Decimal::new(100_000, 0),
                    buying_power: Decimal::new(200_000, 0),
                },
                market_open: true,
                positions: HashMap::new(),
                orders: HashMap::new(),
                client_index: HashMap::new(),
                submitted: Vec::new(),
                submit_failures: VecDeque::new(),
                fill_status: "filled".to_string(),
                fill_prices: HashMap::new(),
                untradeable: HashSet::new(),
                next_id: 1,
            }),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the account snapshot.
    pub fn set_account(&self, cash: Decimal, portfolio_value: Decimal, buying_power: Decimal) {
        let mut state = self.locked();
        state.account = AccountSnapshot {
            cash,
            portfolio_value,
            buying_power,
        };
    }

    /// Open or close the market clock.
    pub fn set_market_open(&self, open: bool) {
        self.locked().market_open = open;
    }

    /// Seed a broker-side position.
    pub fn add_position(&self, ticker: &str, qty: Decimal, avg_entry_price: Decimal) {
        let mut state = self.locked();
        let current_price = state.fill_prices.get(ticker).copied();
        state.positions.insert(
            ticker.to_string(),
            BrokerPosition {
                ticker: ticker.to_string(),
                qty,
                avg_entry_price,
                current_price,
                unrealized_pnl: None,
            },
        );
    }

    /// Set the status new submissions acknowledge with (`filled`, `new`, ...).
    pub fn set_fill_status(&self, status: &str) {
        self.locked().fill_status = status.to_string();
    }

    /// Script the fill price for a ticker, marking any held position to it.
    pub fn set_fill_price(&self, ticker: &str, price: Decimal) {
        let mut state = self.locked();
        state.fill_prices.insert(ticker.to_string(), price);
        if let Some(position) = state.positions.get_mut(ticker) {
            position.current_price = Some(price);
        }
    }

    /// Queue an error for the next submission attempt.
    pub fn fail_next_submit(&self, err: BrokerError) {
        self.locked().submit_failures.push_back(err);
    }

    /// Mark a ticker untradeable.
    pub fn set_untradeable(&self, ticker: &str) {
        self.locked().untradeable.insert(ticker.to_string());
    }

    /// Overwrite a previously returned order's state, as if the broker
    /// progressed it between polls.
    pub fn advance_order(&self, broker_order_id: &str, raw_status: &str, filled_qty: Decimal, price: Option<Decimal>) {
        let mut state = self.locked();
        if let Some(ack) = state.orders.get_mut(broker_order_id) {
            ack.raw_status = raw_status.to_string();
            ack.filled_qty = filled_qty;
            ack.filled_avg_price = price;
        }
    }

    /// Requests submitted so far, in order.
    #[must_use]
    pub fn submitted_requests(&self) -> Vec<SubmitOrderRequest> {
        self.locked().submitted.clone()
    }

    fn fill_price_for(state: &MockState, request: &SubmitOrderRequest) -> Decimal {
        state
            .fill_prices
            .get(&request.ticker)
            .copied()
            .or(request.limit_price)
            .unwrap_or_else(|| Decimal::new(100, 0))
    }
}

#[async_trait]
impl BrokerGateway for MockGateway {
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(self.locked().account.clone())
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        let now = Utc::now();
        let state = self.locked();
        Ok(MarketClock {
            is_open: state.market_open,
            next_open: now + Duration::hours(if state.market_open { 20 } else { 1 }),
            next_close: now + Duration::hours(if state.market_open { 4 } else { 24 }),
        })
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let mut positions: Vec<_> = self.locked().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn get_position(&self, ticker: &str) -> Result<Option<BrokerPosition>, BrokerError> {
        Ok(self.locked().positions.get(ticker).cloned())
    }

    async fn submit_order(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError> {
        let mut state = self.locked();
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        if state.untradeable.contains(&request.ticker) {
            return Err(BrokerError::OrderRejected {
                reason: format!("{} is not tradeable", request.ticker),
            });
        }

        let id = format!("mock-{}", state.next_id);
        state.next_id += 1;
        let filled = state.fill_status == "filled";
        let price = Self::fill_price_for(&state, &request);
        let ack = OrderAck {
            broker_order_id: id.clone(),
            client_order_id: request.client_order_id.clone(),
            raw_status: state.fill_status.clone(),
            filled_qty: if filled { request.qty } else { Decimal::ZERO },
            filled_avg_price: filled.then_some(price),
        };
        if filled {
            match request.side {
                crate::models::OrderSide::Buy => {
                    state.positions.insert(
                        request.ticker.clone(),
                        BrokerPosition {
                            ticker: request.ticker.clone(),
                            qty: request.qty,
                            avg_entry_price: price,
                            current_price: Some(price),
                            unrealized_pnl: None,
                        },
                    );
                }
                crate::models::OrderSide::Sell => {
                    if let Some(position) = state.positions.get_mut(&request.ticker) {
                        position.qty -= request.qty;
                        if position.qty <= Decimal::ZERO {
                            state.positions.remove(&request.ticker);
                        }
                    }
                }
            }
        }
        state.orders.insert(id.clone(), ack.clone());
        state
            .client_index
            .insert(request.client_order_id.clone(), id);
        state.submitted.push(request);
        Ok(ack)
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<OrderAck, BrokerError> {
        self.locked()
            .orders
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound {
                what: format!("order {broker_order_id}"),
            })
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<OrderAck, BrokerError> {
        let state = self.locked();
        state
            .client_index
            .get(client_order_id)
            .and_then(|id| state.orders.get(id))
            .cloned()
            .ok_or_else(|| BrokerError::NotFound {
                what: format!("order {client_order_id}"),
            })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.locked();
        match state.orders.get_mut(broker_order_id) {
            Some(ack) => {
                ack.raw_status = "canceled".to_string();
                Ok(())
            }
            None => Err(BrokerError::NotFound {
                what: format!("order {broker_order_id}"),
            }),
        }
    }

    async fn is_asset_tradeable(&self, ticker: &str) -> Result<AssetStatus, BrokerError> {
        let state = self.locked();
        if state.untradeable.contains(ticker) {
            Ok(AssetStatus {
                tradeable: false,
                warning: Some(format!("{ticker} is halted")),
            })
        } else {
            Ok(AssetStatus {
                tradeable: true,
                warning: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn submit_fills_at_scripted_price() {
        let gw = MockGateway::new();
        gw.set_fill_price("AAPL", dec!(150.25));
        let ack = gw
            .submit_order(SubmitOrderRequest::market(
                "AAPL-BUY-20260826".into(),
                "AAPL".into(),
                OrderSide::Buy,
                dec!(33),
            ))
            .await
            .unwrap();
        assert_eq!(ack.raw_status, "filled");
        assert_eq!(ack.filled_qty, dec!(33));
        assert_eq!(ack.filled_avg_price, Some(dec!(150.25)));
        assert_eq!(gw.submitted_requests().len(), 1);
    }

    #[tokio::test]
    async fn queued_failure_surfaces_once() {
        let gw = MockGateway::new();
        gw.fail_next_submit(BrokerError::Connection {
            message: "reset".into(),
        });
        let req = SubmitOrderRequest::market(
            "AAPL-BUY-20260826".into(),
            "AAPL".into(),
            OrderSide::Buy,
            dec!(1),
        );
        assert!(gw.submit_order(req.clone()).await.is_err());
        assert!(gw.submit_order(req).await.is_ok());
    }

    #[tokio::test]
    async fn order_progresses_between_polls() {
        let gw = MockGateway::new();
        gw.set_fill_status("new");
        let ack = gw
            .submit_order(SubmitOrderRequest::market(
                "MSFT-BUY-20260826".into(),
                "MSFT".into(),
                OrderSide::Buy,
                dec!(10),
            ))
            .await
            .unwrap();
        assert_eq!(ack.filled_qty, Decimal::ZERO);

        gw.advance_order(&ack.broker_order_id, "filled", dec!(10), Some(dec!(99.5)));
        let polled = gw
            .get_order_by_client_id("MSFT-BUY-20260826")
            .await
            .unwrap();
        assert_eq!(polled.raw_status, "filled");
        assert_eq!(polled.filled_avg_price, Some(dec!(99.5)));
    }

    #[tokio::test]
    async fn filled_sell_clears_the_position() {
        let gw = MockGateway::new();
        gw.add_position("GOOG", dec!(3), dec!(180));
        gw.submit_order(SubmitOrderRequest::market(
            "GOOG-SELL-20260826".into(),
            "GOOG".into(),
            OrderSide::Sell,
            dec!(3),
        ))
        .await
        .unwrap();
        assert!(gw.get_position("GOOG").await.unwrap().is_none());
    }
}
