//! HTTP transport with retry.
//!
//! Every call runs through one retry loop: transport errors, 429 (honoring
//! `Retry-After`), and 5xx retry with bounded exponential backoff plus
//! jitter; 4xx returns immediately.

use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::config::{AlpacaConfig, RetryConfig};
use super::error::AlpacaError;

/// Shared HTTP client for both the trading and data APIs.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: AlpacaConfig,
}

impl HttpClient {
    /// Build a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `AlpacaError::Transport` when the underlying client cannot be
    /// constructed.
    pub fn new(config: AlpacaConfig) -> Result<Self, AlpacaError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// GET against the trading API.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AlpacaError> {
        let url = format!("{}{path}", self.config.trading_base_url());
        self.execute(Method::GET, &url, None).await
    }

    /// GET against the market data API.
    pub async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, AlpacaError> {
        let url = format!("{}{path}", self.config.data_base_url());
        self.execute(Method::GET, &url, None).await
    }

    /// POST a JSON body against the trading API.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AlpacaError> {
        let url = format!("{}{path}", self.config.trading_base_url());
        self.execute(Method::POST, &url, Some(body)).await
    }

    /// DELETE against the trading API where success is 204 No Content.
    pub async fn delete_no_content(&self, path: &str) -> Result<(), AlpacaError> {
        let url = format!("{}{path}", self.config.trading_base_url());
        let mut backoff = Backoff::new(&self.config.retry);
        loop {
            let result = self.send(Method::DELETE, &url, None).await;
            match result {
                Ok(_) => return Ok(()),
                Err(err) => backoff.handle(err, &url).await?,
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, AlpacaError> {
        let mut backoff = Backoff::new(&self.config.retry);
        loop {
            let result = self.send(method.clone(), url, body.as_ref()).await;
            match result {
                Ok(text) => {
                    return serde_json::from_str(&text).map_err(|source| {
                        AlpacaError::MalformedResponse {
                            endpoint: url.to_string(),
                            source,
                        }
                    });
                }
                Err(err) => backoff.handle(err, url).await?,
            }
        }
    }

    /// One attempt. Classifies the status and returns the body text on 2xx.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, AlpacaError> {
        let mut request = self
            .client
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.config.api_key)
            .header("APCA-API-SECRET-KEY", &self.config.api_secret);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.text().await?);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = response
            .text()
            .await
            .ok()
            .and_then(|text| {
                serde_json::from_str::<super::api_types::ApiErrorBody>(&text)
                    .map(|e| e.message)
                    .ok()
                    .or(Some(text))
            })
            .unwrap_or_default();

        Err(classify_status(status, retry_after, url, message))
    }
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<u64>,
    url: &str,
    message: String,
) -> AlpacaError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AlpacaError::Unauthorized {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => AlpacaError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        },
        StatusCode::NOT_FOUND => AlpacaError::NotFound {
            endpoint: url.to_string(),
        },
        StatusCode::UNPROCESSABLE_ENTITY => AlpacaError::UnprocessableOrder { message },
        s if s.is_server_error() => AlpacaError::ServerError {
            status: s.as_u16(),
            message,
        },
        s => AlpacaError::Unexpected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Retry state for one logical call.
struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
    current: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            attempt: 1,
            current: config.initial_backoff,
        }
    }

    /// Sleep and continue when the error is retryable and attempts remain,
    /// otherwise surface the error.
    async fn handle(&mut self, err: AlpacaError, url: &str) -> Result<(), AlpacaError> {
        if !err.is_retryable() || self.attempt >= self.config.max_attempts {
            return Err(err);
        }

        let delay = match &err {
            AlpacaError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs).max(self.current)
            }
            _ => self.current,
        };
        let delay = jittered(delay, self.config.jitter_factor);

        warn!(
            url,
            attempt = self.attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying broker call"
        );
        tokio::time::sleep(delay).await;

        self.attempt += 1;
        self.current = self
            .current
            .mul_f64(self.config.multiplier)
            .min(self.config.max_backoff);
        debug!(attempt = self.attempt, "Backoff advanced");
        Ok(())
    }
}

fn jittered(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || base.is_zero() {
        return base;
    }
    let spread = base.as_secs_f64() * factor;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
}
