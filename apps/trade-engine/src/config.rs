//! Engine settings from environment variables.
//!
//! # Required
//! - `ALPACA_KEY`: broker API key
//! - `ALPACA_SECRET`: broker API secret
//!
//! # Optional
//! - `ENGINE_ENV`: PAPER | LIVE (default: PAPER)
//! - `ENGINE_DATA_DIR`: durable state directory (default: `./data`)
//! - `ENGINE_SIGNALS_FILE`: candidate feed for the morning pass
//!   (default: `<data dir>/signals.json`)
//! - `TRADING_ENABLED`: set to `false` to disable new entries (default: true)
//! - `REDEPLOY_ENABLED`: set to `false` to disable capital redeployment
//! - `RUST_LOG`: log level (default: info)

use std::path::PathBuf;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::broker::alpaca::{AlpacaConfig, AlpacaEnvironment};

/// Error building settings from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A variable could not be parsed.
    #[error("invalid value for {var}: {value}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Portfolio and risk limits for the validation pipeline.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Minimum candidate score to be eligible.
    pub min_score: Decimal,
    /// Maximum concurrent positions.
    pub max_positions: usize,
    /// Fraction of portfolio value allocated per position.
    pub position_size_pct: Decimal,
    /// Daily loss as a fraction of portfolio value that trips the breaker.
    pub max_daily_loss_pct: Decimal,
    /// Consecutive losing closes that trip the breaker.
    pub max_consecutive_losses: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_score: dec!(7.0),
            max_positions: 10,
            position_size_pct: dec!(0.05),
            max_daily_loss_pct: dec!(0.03),
            max_consecutive_losses: 3,
        }
    }
}

/// Parsed engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Broker configuration (credentials, endpoints, retry policy).
    pub alpaca: AlpacaConfig,
    /// Durable state directory.
    pub data_dir: PathBuf,
    /// Candidate feed read by the morning pass.
    pub signals_file: PathBuf,
    /// Master switch for new entries.
    pub trading_enabled: bool,
    /// Master switch for capital redeployment.
    pub redeploy_enabled: bool,
    /// Validation limits.
    pub limits: RiskLimits,
}

impl EngineSettings {
    /// Build settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingVar` when broker credentials are absent;
    /// the engine cannot start without them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ALPACA_KEY").map_err(|_| ConfigError::MissingVar("ALPACA_KEY"))?;
        let api_secret =
            std::env::var("ALPACA_SECRET").map_err(|_| ConfigError::MissingVar("ALPACA_SECRET"))?;

        let environment = match std::env::var("ENGINE_ENV").as_deref() {
            Ok("LIVE" | "live") => AlpacaEnvironment::Live,
            Ok("PAPER" | "paper") | Err(_) => AlpacaEnvironment::Paper,
            Ok(other) => {
                return Err(ConfigError::InvalidVar {
                    var: "ENGINE_ENV",
                    value: other.to_string(),
                });
            }
        };

        let data_dir = std::env::var("ENGINE_DATA_DIR")
            .map_or_else(|_| PathBuf::from("data"), PathBuf::from);

        let signals_file = std::env::var("ENGINE_SIGNALS_FILE")
            .map_or_else(|_| data_dir.join("signals.json"), PathBuf::from);

        Ok(Self {
            alpaca: AlpacaConfig::new(api_key, api_secret, environment),
            data_dir,
            signals_file,
            trading_enabled: env_flag("TRADING_ENABLED", true),
            redeploy_enabled: env_flag("REDEPLOY_ENABLED", true),
            limits: RiskLimits::default(),
        })
    }
}

/// Read a boolean flag from the environment, defaulting when unset.
fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).map_or(default, |v| v != "false" && v != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = RiskLimits::default();
        assert_eq!(limits.min_score, dec!(7.0));
        assert_eq!(limits.max_positions, 10);
        assert_eq!(limits.position_size_pct, dec!(0.05));
        assert_eq!(limits.max_daily_loss_pct, dec!(0.03));
        assert_eq!(limits.max_consecutive_losses, 3);
    }
}
