//! Broker reconciliation.
//!
//! The broker is the source of truth for what is actually held. Comparison
//! is pure; correction is applied only when the caller allows it (the
//! pre-market pass does, the intraday status check only reports).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::book::{BookError, Position, PositionBook};
use crate::broker::BrokerPosition;
use crate::ledger::OrderLedger;
use crate::models::OrderSide;

/// How a local and broker view of a ticker disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Broker holds it, the book does not.
    MissingLocal {
        /// Broker quantity.
        broker_qty: Decimal,
        /// Broker average entry.
        avg_entry_price: Decimal,
    },
    /// The book holds it, the broker does not.
    MissingBroker {
        /// Local quantity.
        local_qty: Decimal,
    },
    /// Both hold it with different quantities.
    QtyMismatch {
        /// Local quantity.
        local_qty: Decimal,
        /// Broker quantity.
        broker_qty: Decimal,
    },
}

/// One disagreement found by comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    /// Ticker in disagreement.
    pub ticker: String,
    /// The disagreement.
    pub kind: DiscrepancyKind,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Everything that disagreed before correction.
    pub discrepancies: Vec<Discrepancy>,
    /// How many were corrected in place.
    pub corrected: usize,
    /// How many remain for the operator.
    pub unresolved: usize,
}

impl ReconcileReport {
    /// Whether the views agreed (or were made to agree).
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.unresolved == 0
    }
}

/// Compare the local book against the broker's positions.
#[must_use]
pub fn compare(local: &[Position], broker: &[BrokerPosition]) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    for theirs in broker {
        match local.iter().find(|p| p.ticker == theirs.ticker) {
            None => discrepancies.push(Discrepancy {
                ticker: theirs.ticker.clone(),
                kind: DiscrepancyKind::MissingLocal {
                    broker_qty: theirs.qty,
                    avg_entry_price: theirs.avg_entry_price,
                },
            }),
            Some(ours) if ours.qty != theirs.qty => discrepancies.push(Discrepancy {
                ticker: theirs.ticker.clone(),
                kind: DiscrepancyKind::QtyMismatch {
                    local_qty: ours.qty,
                    broker_qty: theirs.qty,
                },
            }),
            Some(_) => {}
        }
    }

    for ours in local {
        if !broker.iter().any(|p| p.ticker == ours.ticker) {
            discrepancies.push(Discrepancy {
                ticker: ours.ticker.clone(),
                kind: DiscrepancyKind::MissingBroker {
                    local_qty: ours.qty,
                },
            });
        }
    }

    discrepancies
}

/// Reconcile the book against the broker, correcting in place when allowed.
///
/// Corrections take the broker's side: untracked broker positions are
/// adopted, quantity mismatches take the broker quantity, and book entries
/// the broker no longer holds are dropped. The drop is held back while the
/// ledger still shows an active sell for the ticker; in that window the
/// position likely just sold and the order poll will close it properly.
///
/// # Errors
///
/// Returns a persistence error from the book.
pub fn sync_with_broker(
    book: &mut PositionBook,
    ledger: &OrderLedger,
    broker: &[BrokerPosition],
    auto_correct: bool,
    today: NaiveDate,
) -> Result<ReconcileReport, BookError> {
    let discrepancies = compare(&book.positions(), broker);
    let mut corrected = 0;

    for discrepancy in &discrepancies {
        if !auto_correct {
            warn!(
                ticker = %discrepancy.ticker,
                kind = ?discrepancy.kind,
                "Position discrepancy (reporting only)"
            );
            continue;
        }
        match &discrepancy.kind {
            DiscrepancyKind::MissingLocal {
                broker_qty,
                avg_entry_price,
            } => {
                book.adopt(&discrepancy.ticker, *broker_qty, *avg_entry_price, today)?;
                corrected += 1;
            }
            DiscrepancyKind::QtyMismatch { broker_qty, .. } => {
                info!(
                    ticker = %discrepancy.ticker,
                    qty = %broker_qty,
                    "Correcting quantity to broker's figure"
                );
                book.set_qty(&discrepancy.ticker, *broker_qty)?;
                corrected += 1;
            }
            DiscrepancyKind::MissingBroker { .. } => {
                if ledger.has_active(&discrepancy.ticker, OrderSide::Sell) {
                    warn!(
                        ticker = %discrepancy.ticker,
                        "Broker missing position but a sell is in flight, deferring"
                    );
                    continue;
                }
                warn!(
                    ticker = %discrepancy.ticker,
                    "Dropping position the broker no longer holds"
                );
                book.remove(&discrepancy.ticker)?;
                corrected += 1;
            }
        }
    }

    let unresolved = discrepancies.len() - corrected;
    Ok(ReconcileReport {
        discrepancies,
        corrected,
        unresolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookConfig;
    use crate::models::SignalTier;
    use crate::store::JsonStore;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 26).unwrap()
    }

    fn broker_position(ticker: &str, qty: Decimal, entry: Decimal) -> BrokerPosition {
        BrokerPosition {
            ticker: ticker.to_string(),
            qty,
            avg_entry_price: entry,
            current_price: None,
            unrealized_pnl: None,
        }
    }

    fn fixtures() -> (PositionBook, OrderLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let book = PositionBook::load(store.clone(), BookConfig::default()).unwrap();
        let ledger = OrderLedger::load(store).unwrap();
        (book, ledger, dir)
    }

    #[test]
    fn matching_views_are_clean() {
        let (mut book, ledger, _dir) = fixtures();
        book.open_position("MSFT", dec!(10), dec!(400), SignalTier::B, dec!(8), None, today())
            .unwrap();
        let broker = vec![broker_position("MSFT", dec!(10), dec!(400))];
        let report = sync_with_broker(&mut book, &ledger, &broker, true, today()).unwrap();
        assert!(report.is_clean());
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn classifies_all_three_kinds() {
        let (mut book, _ledger, _dir) = fixtures();
        book.open_position("MSFT", dec!(10), dec!(400), SignalTier::B, dec!(8), None, today())
            .unwrap();
        book.open_position("GONE", dec!(5), dec!(50), SignalTier::C, dec!(7), None, today())
            .unwrap();
        let broker = vec![
            broker_position("MSFT", dec!(7), dec!(400)),
            broker_position("GOOG", dec!(3), dec!(180)),
        ];

        let discrepancies = compare(&book.positions(), &broker);
        assert_eq!(discrepancies.len(), 3);
        assert!(discrepancies.iter().any(|d| d.ticker == "MSFT"
            && matches!(d.kind, DiscrepancyKind::QtyMismatch { .. })));
        assert!(discrepancies.iter().any(|d| d.ticker == "GOOG"
            && matches!(d.kind, DiscrepancyKind::MissingLocal { .. })));
        assert!(discrepancies.iter().any(|d| d.ticker == "GONE"
            && matches!(d.kind, DiscrepancyKind::MissingBroker { .. })));
    }

    #[test]
    fn corrections_take_the_brokers_side() {
        let (mut book, ledger, _dir) = fixtures();
        book.open_position("MSFT", dec!(10), dec!(400), SignalTier::B, dec!(8), None, today())
            .unwrap();
        let broker = vec![
            broker_position("MSFT", dec!(7), dec!(400)),
            broker_position("GOOG", dec!(3), dec!(180)),
        ];

        let report = sync_with_broker(&mut book, &ledger, &broker, true, today()).unwrap();
        assert_eq!(report.corrected, 2);
        assert!(report.is_clean());
        assert_eq!(book.get("MSFT").unwrap().qty, dec!(7));
        let adopted = book.get("GOOG").unwrap();
        assert_eq!(adopted.qty, dec!(3));
        assert_eq!(adopted.tier, SignalTier::C);
    }

    #[test]
    fn report_only_mode_corrects_nothing() {
        let (mut book, ledger, _dir) = fixtures();
        book.open_position("MSFT", dec!(10), dec!(400), SignalTier::B, dec!(8), None, today())
            .unwrap();
        let broker = vec![broker_position("MSFT", dec!(7), dec!(400))];

        let report = sync_with_broker(&mut book, &ledger, &broker, false, today()).unwrap();
        assert_eq!(report.corrected, 0);
        assert_eq!(report.unresolved, 1);
        assert_eq!(book.get("MSFT").unwrap().qty, dec!(10));
    }

    #[test]
    fn in_flight_sell_defers_removal() {
        let (mut book, mut ledger, _dir) = fixtures();
        book.open_position("AAPL", dec!(33), dec!(150), SignalTier::B, dec!(9), None, today())
            .unwrap();
        ledger
            .create_order(
                "AAPL",
                OrderSide::Sell,
                SignalTier::C,
                dec!(0),
                dec!(33),
                None,
                "2026-08-26T14:30:00Z".parse().unwrap(),
            )
            .unwrap();

        let report = sync_with_broker(&mut book, &ledger, &[], true, today()).unwrap();
        assert_eq!(report.corrected, 0);
        assert_eq!(report.unresolved, 1);
        assert!(book.get("AAPL").is_some());
    }

    #[test]
    fn comparison_is_symmetric_on_missing_kinds() {
        let (mut book, _ledger, _dir) = fixtures();
        book.open_position("ONLY", dec!(5), dec!(10), SignalTier::C, dec!(7), None, today())
            .unwrap();
        let broker = vec![broker_position("OTHER", dec!(2), dec!(20))];

        let discrepancies = compare(&book.positions(), &broker);
        let missing_local = discrepancies
            .iter()
            .filter(|d| matches!(d.kind, DiscrepancyKind::MissingLocal { .. }))
            .count();
        let missing_broker = discrepancies
            .iter()
            .filter(|d| matches!(d.kind, DiscrepancyKind::MissingBroker { .. }))
            .count();
        assert_eq!(missing_local, 1);
        assert_eq!(missing_broker, 1);
    }
}
