//! Candidate validation pipeline.
//!
//! Pure decision logic, evaluated in a fixed order. Quality failures reject
//! outright; capacity failures queue the candidate so freed capital can pick
//! it up later the same day.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::RiskLimits;
use crate::models::TradeCandidate;

/// Reference prices drifting further than this from the live price reject
/// the candidate; the signal was computed against a different market.
pub const MAX_PRICE_DRIFT: Decimal = dec!(0.10);

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Enter now with this share quantity.
    Accept {
        /// Whole shares to buy.
        qty: Decimal,
    },
    /// Not now, but worth keeping for redeployment.
    Queue {
        /// Why it was queued.
        reason: String,
    },
    /// Not worth keeping.
    Reject {
        /// Why it was rejected.
        reason: String,
    },
}

/// Market and portfolio facts the pipeline judges a candidate against.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Total portfolio value, used for sizing.
    pub portfolio_value: Decimal,
    /// Settled cash available.
    pub cash: Decimal,
    /// Open position count.
    pub open_positions: usize,
    /// Tickers currently held.
    pub held: Vec<String>,
    /// Whether a buy order for this ticker is already in flight.
    pub has_active_buy: bool,
    /// Live price, when a quote exists.
    pub current_price: Option<Decimal>,
    /// Whether the broker will take orders for the asset.
    pub tradeable: bool,
}

/// Run the pipeline for one candidate.
#[must_use]
pub fn validate(candidate: &TradeCandidate, limits: &RiskLimits, ctx: &ValidationContext) -> Verdict {
    if candidate.ticker.trim().is_empty() {
        return Verdict::Reject {
            reason: "empty ticker".to_string(),
        };
    }
    if candidate.reference_price <= Decimal::ZERO {
        return Verdict::Reject {
            reason: format!("non-positive reference price {}", candidate.reference_price),
        };
    }
    if candidate.score < limits.min_score {
        return Verdict::Reject {
            reason: format!("score {} below minimum {}", candidate.score, limits.min_score),
        };
    }
    if ctx.held.contains(&candidate.ticker) {
        return Verdict::Reject {
            reason: format!("{} already held", candidate.ticker),
        };
    }
    if ctx.has_active_buy {
        return Verdict::Reject {
            reason: format!("buy order for {} already in flight", candidate.ticker),
        };
    }
    if !ctx.tradeable {
        return Verdict::Reject {
            reason: format!("{} is not tradeable", candidate.ticker),
        };
    }

    let Some(price) = ctx.current_price else {
        return Verdict::Reject {
            reason: format!("no quote for {}", candidate.ticker),
        };
    };
    let drift = ((price - candidate.reference_price) / candidate.reference_price).abs();
    if drift > MAX_PRICE_DRIFT {
        return Verdict::Reject {
            reason: format!(
                "price drifted {:.1}% from signal reference",
                drift * dec!(100)
            ),
        };
    }

    if ctx.open_positions >= limits.max_positions {
        return Verdict::Queue {
            reason: format!("portfolio full ({} positions)", ctx.open_positions),
        };
    }

    let allocation = ctx.portfolio_value * limits.position_size_pct;
    let qty = (allocation / price).floor();
    if qty < Decimal::ONE {
        return Verdict::Reject {
            reason: format!("allocation {allocation} buys zero shares at {price}"),
        };
    }
    if qty * price > ctx.cash {
        return Verdict::Queue {
            reason: format!("insufficient cash ({} needed, {} available)", qty * price, ctx.cash),
        };
    }

    debug!(ticker = %candidate.ticker, qty = %qty, price = %price, "Candidate accepted");
    Verdict::Accept { qty }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalTier;

    fn candidate(score: Decimal, reference: Decimal) -> TradeCandidate {
        TradeCandidate {
            ticker: "AAPL".to_string(),
            reference_price: reference,
            score,
            tier: SignalTier::A,
            sector: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn ctx() -> ValidationContext {
        ValidationContext {
            portfolio_value: dec!(100_000),
            cash: dec!(50_000),
            open_positions: 2,
            held: vec!["MSFT".to_string()],
            has_active_buy: false,
            current_price: Some(dec!(150)),
            tradeable: true,
        }
    }

    #[test]
    fn sizes_to_whole_shares() {
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx());
        // 5% of 100k at $150 is 33.33 shares, floored.
        assert_eq!(verdict, Verdict::Accept { qty: dec!(33) });
    }

    #[test]
    fn malformed_candidates_reject() {
        let mut bad = candidate(dec!(9.0), dec!(150));
        bad.ticker = "  ".to_string();
        assert!(matches!(
            validate(&bad, &RiskLimits::default(), &ctx()),
            Verdict::Reject { .. }
        ));

        let verdict = validate(&candidate(dec!(9.0), dec!(0)), &RiskLimits::default(), &ctx());
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn low_score_rejects() {
        let verdict = validate(&candidate(dec!(6.9), dec!(150)), &RiskLimits::default(), &ctx());
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn held_ticker_rejects() {
        let mut ctx = ctx();
        ctx.held.push("AAPL".to_string());
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn in_flight_buy_rejects() {
        let mut ctx = ctx();
        ctx.has_active_buy = true;
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn untradeable_rejects() {
        let mut ctx = ctx();
        ctx.tradeable = false;
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn missing_quote_rejects() {
        let mut ctx = ctx();
        ctx.current_price = None;
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn excessive_drift_rejects() {
        // Signal priced at $130, market now at $150: 15.4% drift.
        let verdict = validate(&candidate(dec!(9.0), dec!(130)), &RiskLimits::default(), &ctx());
        assert!(matches!(verdict, Verdict::Reject { .. }));

        // 5% drift is inside tolerance.
        let verdict = validate(&candidate(dec!(9.0), dec!(143)), &RiskLimits::default(), &ctx());
        assert!(matches!(verdict, Verdict::Accept { .. }));
    }

    #[test]
    fn full_portfolio_queues() {
        let mut ctx = ctx();
        ctx.open_positions = 10;
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Queue { .. }));
    }

    #[test]
    fn insufficient_cash_queues() {
        let mut ctx = ctx();
        ctx.cash = dec!(1000);
        let verdict = validate(&candidate(dec!(9.0), dec!(150)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Queue { .. }));
    }

    #[test]
    fn priced_out_allocation_rejects() {
        let mut ctx = ctx();
        ctx.current_price = Some(dec!(6000));
        let verdict = validate(&candidate(dec!(9.0), dec!(6000)), &RiskLimits::default(), &ctx);
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }
}
