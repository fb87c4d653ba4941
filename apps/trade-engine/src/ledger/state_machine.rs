//! Order lifecycle transition rules.
//!
//! Forward jumps are legal: a market order can come back from the broker
//! already `filled`, skipping `Accepted` entirely. Terminal states accept
//! nothing, and a repeated status is a no-op rather than an error.

use thiserror::Error;

use crate::models::OrderStatus;

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid order transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current state.
    pub from: OrderStatus,
    /// Requested state.
    pub to: OrderStatus,
}

/// Whether `from -> to` is a legal lifecycle move.
#[must_use]
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus as S;

    if from == to {
        // Repeated partial fills land here; quantity moves, state does not.
        return !from.is_terminal();
    }

    match from {
        S::PendingSubmit => matches!(
            to,
            S::Submitted
                | S::Accepted
                | S::PartiallyFilled
                | S::Filled
                | S::Rejected
                | S::Cancelled
                | S::Failed
        ),
        S::Submitted => matches!(
            to,
            S::Accepted | S::PartiallyFilled | S::Filled | S::Rejected | S::Cancelled | S::Expired
        ),
        S::Accepted => matches!(
            to,
            S::PartiallyFilled | S::Filled | S::Rejected | S::Cancelled | S::Expired
        ),
        S::PartiallyFilled => matches!(to, S::Filled | S::Cancelled | S::Expired),
        S::Filled | S::Rejected | S::Cancelled | S::Expired | S::Failed => false,
    }
}

/// Validate and return the new state.
///
/// # Errors
///
/// Returns `InvalidTransition` when the move is not legal.
pub fn transition(from: OrderStatus, to: OrderStatus) -> Result<OrderStatus, InvalidTransition> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus as S;

    #[test]
    fn happy_path() {
        assert!(is_valid_transition(S::PendingSubmit, S::Submitted));
        assert!(is_valid_transition(S::Submitted, S::Accepted));
        assert!(is_valid_transition(S::Accepted, S::PartiallyFilled));
        assert!(is_valid_transition(S::PartiallyFilled, S::Filled));
    }

    #[test]
    fn market_order_forward_jumps() {
        assert!(is_valid_transition(S::PendingSubmit, S::Filled));
        assert!(is_valid_transition(S::Submitted, S::Filled));
        assert!(is_valid_transition(S::Accepted, S::Filled));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [S::Filled, S::Rejected, S::Cancelled, S::Expired, S::Failed] {
            for to in [S::Submitted, S::Accepted, S::PartiallyFilled, S::Filled] {
                if terminal == to {
                    continue;
                }
                assert!(!is_valid_transition(terminal, to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn no_backward_moves() {
        assert!(!is_valid_transition(S::Accepted, S::Submitted));
        assert!(!is_valid_transition(S::PartiallyFilled, S::Accepted));
        assert!(!is_valid_transition(S::Filled, S::PartiallyFilled));
    }

    #[test]
    fn failed_only_from_pending() {
        assert!(is_valid_transition(S::PendingSubmit, S::Failed));
        assert!(!is_valid_transition(S::Submitted, S::Failed));
        assert!(!is_valid_transition(S::Accepted, S::Failed));
    }

    #[test]
    fn repeated_partial_fill_is_a_no_op_move() {
        assert!(is_valid_transition(S::PartiallyFilled, S::PartiallyFilled));
        assert!(is_valid_transition(S::Submitted, S::Submitted));
        assert!(!is_valid_transition(S::Filled, S::Filled));
    }

    #[test]
    fn transition_reports_the_pair() {
        let err = transition(S::Filled, S::Cancelled).unwrap_err();
        assert_eq!(err.from, S::Filled);
        assert_eq!(err.to, S::Cancelled);
    }
}
