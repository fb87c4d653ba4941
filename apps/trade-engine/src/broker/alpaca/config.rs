//! Alpaca adapter configuration.

use std::time::Duration;

/// Environment for the Alpaca API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpacaEnvironment {
    /// Paper trading (simulated).
    Paper,
    /// Live trading (real money).
    Live,
}

impl AlpacaEnvironment {
    /// Default trading API base URL for this environment.
    #[must_use]
    pub const fn default_trading_url(&self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }

    /// Default market data API base URL.
    #[must_use]
    pub const fn default_data_url(&self) -> &'static str {
        "https://data.alpaca.markets"
    }

    /// Check if this is live trading.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for AlpacaEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

/// Configuration for the Alpaca gateway.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Trading environment.
    pub environment: AlpacaEnvironment,
    /// Trading API base URL override (tests point this at a local server).
    pub trading_url: Option<String>,
    /// Data API base URL override.
    pub data_url: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryConfig,
}

impl AlpacaConfig {
    /// Create a new configuration with environment defaults.
    #[must_use]
    pub fn new(api_key: String, api_secret: String, environment: AlpacaEnvironment) -> Self {
        Self {
            api_key,
            api_secret,
            environment,
            trading_url: None,
            data_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Override the trading API base URL.
    #[must_use]
    pub fn with_trading_url(mut self, url: impl Into<String>) -> Self {
        self.trading_url = Some(url.into());
        self
    }

    /// Override the data API base URL.
    #[must_use]
    pub fn with_data_url(mut self, url: impl Into<String>) -> Self {
        self.data_url = Some(url.into());
        self
    }

    /// Set the retry configuration.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Effective trading API base URL.
    #[must_use]
    pub fn trading_base_url(&self) -> &str {
        self.trading_url
            .as_deref()
            .unwrap_or_else(|| self.environment.default_trading_url())
    }

    /// Effective data API base URL.
    #[must_use]
    pub fn data_base_url(&self) -> &str {
        self.data_url
            .as_deref()
            .unwrap_or_else(|| self.environment.default_data_url())
    }
}

/// Retry policy for broker calls.
///
/// Bounded exponential backoff with jitter; 3 attempts by default.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.2 = plus or minus 20%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// A policy that never sleeps, for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(0),
            max_backoff: Duration::from_millis(0),
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_environment_urls() {
        let env = AlpacaEnvironment::Paper;
        assert!(env.default_trading_url().contains("paper"));
        assert!(!env.is_live());
    }

    #[test]
    fn live_environment_urls() {
        let env = AlpacaEnvironment::Live;
        assert!(!env.default_trading_url().contains("paper"));
        assert!(env.is_live());
    }

    #[test]
    fn url_override_wins() {
        let config = AlpacaConfig::new(
            "key".to_string(),
            "secret".to_string(),
            AlpacaEnvironment::Paper,
        )
        .with_trading_url("http://127.0.0.1:9999");
        assert_eq!(config.trading_base_url(), "http://127.0.0.1:9999");
        assert!(config.data_base_url().contains("data.alpaca"));
    }

    #[test]
    fn retry_config_default() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_backoff, Duration::from_millis(250));
    }
}
