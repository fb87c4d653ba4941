//! Alpaca error classification.

use thiserror::Error;

use crate::broker::BrokerError;

/// Error from the Alpaca HTTP layer.
#[derive(Debug, Error)]
pub enum AlpacaError {
    /// Transport failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 401 or 403.
    #[error("authentication failed (HTTP {status})")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// 429 with the server's suggested delay.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds from the `Retry-After` header, default 1.
        retry_after_secs: u64,
    },

    /// 404.
    #[error("not found: {endpoint}")]
    NotFound {
        /// Endpoint that returned 404.
        endpoint: String,
    },

    /// 422, order-level rejection.
    #[error("order rejected: {message}")]
    UnprocessableOrder {
        /// Broker rejection message.
        message: String,
    },

    /// 5xx after retries were exhausted.
    #[error("server error (HTTP {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body message.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("malformed response from {endpoint}: {source}")]
    MalformedResponse {
        /// Endpoint that produced the body.
        endpoint: String,
        /// Deserialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// Any other HTTP status.
    #[error("unexpected response (HTTP {status}): {message}")]
    Unexpected {
        /// HTTP status code.
        status: u16,
        /// Response body message.
        message: String,
    },
}

impl AlpacaError {
    /// Whether the retry loop should try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::ServerError { .. }
        )
    }
}

impl From<AlpacaError> for BrokerError {
    fn from(err: AlpacaError) -> Self {
        match err {
            AlpacaError::Transport(e) => Self::Connection {
                message: e.to_string(),
            },
            AlpacaError::Unauthorized { .. } => Self::Auth,
            AlpacaError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            AlpacaError::NotFound { endpoint } => Self::NotFound { what: endpoint },
            AlpacaError::UnprocessableOrder { message } => Self::OrderRejected { reason: message },
            AlpacaError::ServerError { status, message }
            | AlpacaError::Unexpected { status, message } => Self::Unknown {
                message: format!("HTTP {status}: {message}"),
            },
            AlpacaError::MalformedResponse { endpoint, source } => Self::Unknown {
                message: format!("malformed response from {endpoint}: {source}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(AlpacaError::RateLimited {
            retry_after_secs: 2
        }
        .is_retryable());
        assert!(AlpacaError::ServerError {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!AlpacaError::Unauthorized { status: 401 }.is_retryable());
        assert!(!AlpacaError::UnprocessableOrder {
            message: "insufficient buying power".into()
        }
        .is_retryable());
        assert!(!AlpacaError::NotFound {
            endpoint: "/v2/orders/x".into()
        }
        .is_retryable());
    }

    #[test]
    fn maps_to_broker_error_classes() {
        let err: BrokerError = AlpacaError::Unauthorized { status: 403 }.into();
        assert!(matches!(err, BrokerError::Auth));

        let err: BrokerError = AlpacaError::UnprocessableOrder {
            message: "halted".into(),
        }
        .into();
        assert!(matches!(err, BrokerError::OrderRejected { .. }));

        let err: BrokerError = AlpacaError::RateLimited {
            retry_after_secs: 5,
        }
        .into();
        assert!(err.is_transient());
    }
}
