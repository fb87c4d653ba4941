//! Shared domain types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy to open.
    Buy,
    /// Sell to close.
    Sell,
}

impl OrderSide {
    /// Lowercase wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle state.
///
/// `PendingSubmit -> Submitted -> {Accepted, PartiallyFilled} -> Filled`;
/// any non-terminal state may move to `Rejected` or `Cancelled`; orders
/// unresolved for 24h are swept to `Expired`; a failed submission call goes
/// directly to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, not yet sent to the broker.
    PendingSubmit,
    /// Sent to the broker, no acknowledgment beyond receipt.
    Submitted,
    /// Acknowledged and working at the broker.
    Accepted,
    /// Some quantity has filled.
    PartiallyFilled,
    /// Fully filled (terminal).
    Filled,
    /// Rejected by the broker (terminal).
    Rejected,
    /// Cancelled (terminal).
    Cancelled,
    /// Swept after 24h without resolution (terminal).
    Expired,
    /// Submission call itself failed (terminal).
    Failed,
}

impl OrderStatus {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Cancelled | Self::Expired | Self::Failed
        )
    }

    /// Whether the order still occupies its (ticker, side) slot.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingSubmit => "PENDING_SUBMIT",
            Self::Submitted => "SUBMITTED",
            Self::Accepted => "ACCEPTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Conviction tier assigned by the (external) signal layer.
///
/// Higher-conviction tiers are given wider stops; low-conviction trades fail
/// fast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTier {
    /// Highest conviction.
    A,
    /// Medium conviction.
    B,
    /// Default conviction.
    #[default]
    C,
}

/// A pre-scored trade candidate from the signal source.
///
/// The engine performs no scoring of its own; this is an opaque feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    /// Instrument ticker.
    pub ticker: String,
    /// Price at signal time, used for sizing and drift checks.
    pub reference_price: Decimal,
    /// Signal score (higher is better).
    pub score: Decimal,
    /// Conviction tier.
    #[serde(default)]
    pub tier: SignalTier,
    /// Sector label, if known.
    #[serde(default)]
    pub sector: Option<String>,
    /// Opaque signal metadata, carried through to events.
    #[serde(default)]
    pub metadata: serde_json::Value,
}
