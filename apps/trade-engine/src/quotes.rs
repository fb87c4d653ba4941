//! Market price lookups.
//!
//! The monitor pass needs a current price per held ticker. A ticker with no
//! quote is skipped for that cycle, never treated as zero.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::broker::alpaca::{AlpacaConfig, AlpacaError, HttpClient};
use crate::broker::BrokerError;

/// Source of current market prices.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Latest price for one ticker; `None` when no quote is available.
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, BrokerError>;

    /// Latest prices for a batch of tickers. Tickers without a quote are
    /// absent from the result; a transport failure for one ticker drops that
    /// ticker with a warning rather than failing the batch.
    async fn latest_prices(&self, tickers: &[String]) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for ticker in tickers {
            match self.latest_price(ticker).await {
                Ok(Some(price)) => {
                    prices.insert(ticker.clone(), price);
                }
                Ok(None) => {
                    warn!(ticker, "No quote available, skipping this cycle");
                }
                Err(err) => {
                    warn!(ticker, error = %err, "Quote lookup failed, skipping this cycle");
                }
            }
        }
        prices
    }
}

#[derive(Debug, Deserialize)]
struct LatestQuoteBody {
    quote: QuoteBody,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    /// Bid price.
    bp: Decimal,
    /// Ask price.
    ap: Decimal,
}

/// Quote feed backed by the Alpaca market data API.
#[derive(Debug, Clone)]
pub struct AlpacaQuoteFeed {
    http: HttpClient,
}

impl AlpacaQuoteFeed {
    /// Build a feed from broker configuration.
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
impl QuoteFeed for AlpacaQuoteFeed {
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, BrokerError> {
        let path = format!("/v2/stocks/{ticker}/quotes/latest");
        match self.http.get_data::<LatestQuoteBody>(&path).await {
            Ok(body) => {
                // A one-sided or empty book yields zero bid or ask; that is
                // not a usable price.
                if body.quote.bp <= Decimal::ZERO || body.quote.ap <= Decimal::ZERO {
                    return Ok(None);
                }
                let mid = (body.quote.bp + body.quote.ap) / Decimal::TWO;
                Ok(Some(mid))
            }
            Err(AlpacaError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Fixed-price feed for tests.
#[derive(Debug, Default)]
pub struct StaticQuoteFeed {
    prices: Mutex<HashMap<String, Decimal>>,
}

impl StaticQuoteFeed {
    /// Create an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price for a ticker.
    pub fn set(&self, ticker: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(ticker.to_string(), price);
    }

    /// Remove a ticker's price so lookups return no quote.
    pub fn clear(&self, ticker: &str) {
        self.prices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(ticker);
    }
}

#[async_trait]
impl QuoteFeed for StaticQuoteFeed {
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, BrokerError> {
        Ok(self
            .prices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(ticker)
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::alpaca::{AlpacaEnvironment, RetryConfig};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn feed(server: &MockServer) -> AlpacaQuoteFeed {
        let config = AlpacaConfig::new(
            "k".to_string(),
            "s".to_string(),
            AlpacaEnvironment::Paper,
        )
        .with_data_url(server.uri())
        .with_retry(RetryConfig::immediate(1));
        AlpacaQuoteFeed::new(config).unwrap()
    }

    #[tokio::test]
    async fn mid_price_from_quote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/stocks/AAPL/quotes/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "AAPL",
                "quote": {"bp": 150.00, "ap": 150.10, "bs": 2, "as": 1}
            })))
            .mount(&server)
            .await;

        let feed = feed(&server).await;
        let price = feed.latest_price("AAPL").await.unwrap();
        assert_eq!(price, Some(dec!(150.05)));
    }

    #[tokio::test]
    async fn empty_book_is_no_quote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/stocks/THIN/quotes/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "THIN",
                "quote": {"bp": 0, "ap": 12.5}
            })))
            .mount(&server)
            .await;

        let feed = feed(&server).await;
        assert!(feed.latest_price("THIN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_skips_missing_quotes() {
        let feed = StaticQuoteFeed::new();
        feed.set("AAPL", dec!(150));
        let tickers = vec!["AAPL".to_string(), "MSFT".to_string()];
        let prices = feed.latest_prices(&tickers).await;
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["AAPL"], dec!(150));
    }
}
