//! `BrokerGateway` implementation for Alpaca.

use async_trait::async_trait;
use tracing::{info, instrument};

use super::api_types::{AccountBody, AssetBody, ClockBody, OrderBody, OrderRequestBody, PositionBody};
use super::config::AlpacaConfig;
use super::error::AlpacaError;
use super::http_client::HttpClient;
use crate::broker::{
    AccountSnapshot, AssetStatus, BrokerError, BrokerGateway, BrokerPosition, MarketClock,
    OrderAck, SubmitOrderRequest,
};

/// Alpaca implementation of the broker gateway.
#[derive(Debug, Clone)]
pub struct AlpacaGateway {
    http: HttpClient,
}

impl AlpacaGateway {
    /// Build a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: AlpacaConfig) -> Result<Self, BrokerError> {
        let http = HttpClient::new(config).map_err(BrokerError::from)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl BrokerGateway for AlpacaGateway {
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        let body: AccountBody = self.http.get("/v2/account").await?;
        Ok(body.into())
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        let body: ClockBody = self.http.get("/v2/clock").await?;
        Ok(body.into())
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let bodies: Vec<PositionBody> = self.http.get("/v2/positions").await?;
        Ok(bodies.into_iter().map(Into::into).collect())
    }

    async fn get_position(&self, ticker: &str) -> Result<Option<BrokerPosition>, BrokerError> {
        let path = format!("/v2/positions/{ticker}");
        match self.http.get::<PositionBody>(&path).await {
            Ok(body) => Ok(Some(body.into())),
            Err(AlpacaError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, request), fields(ticker = %request.ticker, side = %request.side))]
    async fn submit_order(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError> {
        let payload = serde_json::to_value(OrderRequestBody::from(&request)).map_err(|e| {
            BrokerError::Unknown {
                message: format!("request serialization failed: {e}"),
            }
        })?;
        let body: OrderBody = self.http.post("/v2/orders", payload).await?;
        info!(
            ticker = %request.ticker,
            client_order_id = %request.client_order_id,
            broker_order_id = %body.id,
            status = %body.status,
            "Order submitted"
        );
        Ok(body.into_ack())
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<OrderAck, BrokerError> {
        let path = format!("/v2/orders/{broker_order_id}");
        let body: OrderBody = self.http.get(&path).await?;
        Ok(body.into_ack())
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<OrderAck, BrokerError> {
        let path = format!("/v2/orders:by_client_order_id?client_order_id={client_order_id}");
        let body: OrderBody = self.http.get(&path).await?;
        Ok(body.into_ack())
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let path = format!("/v2/orders/{broker_order_id}");
        self.http.delete_no_content(&path).await?;
        Ok(())
    }

    async fn is_asset_tradeable(&self, ticker: &str) -> Result<AssetStatus, BrokerError> {
        let path = format!("/v2/assets/{ticker}");
        match self.http.get::<AssetBody>(&path).await {
            Ok(body) => {
                let tradeable = body.tradable && body.status == "active";
                let warning = if tradeable {
                    None
                } else {
                    Some(format!(
                        "{} not tradeable (status={}, tradable={})",
                        body.symbol, body.status, body.tradable
                    ))
                };
                Ok(AssetStatus { tradeable, warning })
            }
            Err(AlpacaError::NotFound { .. }) => Ok(AssetStatus {
                tradeable: false,
                warning: Some(format!("{ticker}: unknown symbol")),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::{AlpacaEnvironment, RetryConfig};
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(server: &MockServer) -> AlpacaGateway {
        let config = AlpacaConfig::new(
            "k".to_string(),
            "s".to_string(),
            AlpacaEnvironment::Paper,
        )
        .with_trading_url(server.uri())
        .with_retry(RetryConfig::immediate(1));
        AlpacaGateway::new(config).unwrap()
    }

    #[tokio::test]
    async fn submit_order_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .and(body_partial_json(serde_json::json!({
                "symbol": "AAPL",
                "side": "buy",
                "type": "market",
                "qty": "33",
                "client_order_id": "AAPL-BUY-20260826"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "broker-1",
                "client_order_id": "AAPL-BUY-20260826",
                "symbol": "AAPL",
                "status": "filled",
                "filled_qty": "33",
                "filled_avg_price": "150.10"
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let ack = gw
            .submit_order(SubmitOrderRequest::market(
                "AAPL-BUY-20260826".into(),
                "AAPL".into(),
                OrderSide::Buy,
                dec!(33),
            ))
            .await
            .unwrap();
        assert_eq!(ack.broker_order_id, "broker-1");
        assert_eq!(ack.raw_status, "filled");
        assert_eq!(ack.filled_avg_price, Some(dec!(150.10)));
    }

    #[tokio::test]
    async fn missing_position_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions/TSLA"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"code": 40410000, "message": "position does not exist"})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        assert!(gw.get_position("TSLA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_by_client_order_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orders:by_client_order_id"))
            .and(query_param("client_order_id", "MSFT-SELL-20260826"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "broker-9",
                "client_order_id": "MSFT-SELL-20260826",
                "symbol": "MSFT",
                "status": "accepted",
                "filled_qty": "0",
                "filled_avg_price": null
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let ack = gw
            .get_order_by_client_id("MSFT-SELL-20260826")
            .await
            .unwrap();
        assert_eq!(ack.broker_order_id, "broker-9");
        assert_eq!(ack.raw_status, "accepted");
    }

    #[tokio::test]
    async fn inactive_asset_is_not_tradeable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/assets/HALT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "HALT",
                "status": "inactive",
                "tradable": false
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let status = gw.is_asset_tradeable("HALT").await.unwrap();
        assert!(!status.tradeable);
        assert!(status.warning.unwrap().contains("inactive"));
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_tradeable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/assets/NOPE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let status = gw.is_asset_tradeable("NOPE").await.unwrap();
        assert!(!status.tradeable);
    }

    #[tokio::test]
    async fn cancel_order_accepts_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/orders/broker-9"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        assert!(gw.cancel_order("broker-9").await.is_ok());
    }
}
