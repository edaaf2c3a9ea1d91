use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::book::OrderBook;
use crate::types::{Fill, Side, TradeIntent};

/// Why an intent produced no fill. Non-fatal: the intent is dropped and the
/// session continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("insufficient liquidity")]
    InsufficientLiquidity,
}

/// Outcome of one intent. Every intent yields exactly one report, which is
/// what lets the strategy account for in-flight work instead of sleeping
/// through a grace period.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionReport {
    Filled(Fill),
    Rejected {
        intent: TradeIntent,
        reason: RejectReason,
    },
}

/// Turns trade intents into fills against the shared book.
///
/// Fills do not decrement the book: the book is a pure snapshot view and
/// every match is computed from the latest snapshot.
pub struct MatchingEngine {
    book: Arc<OrderBook>,
    intents: mpsc::Receiver<TradeIntent>,
    reports: mpsc::Sender<ExecutionReport>,
}

impl MatchingEngine {
    pub fn new(
        book: Arc<OrderBook>,
        intents: mpsc::Receiver<TradeIntent>,
        reports: mpsc::Sender<ExecutionReport>,
    ) -> Self {
        Self {
            book,
            intents,
            reports,
        }
    }

    /// Process intents until the queue closes, emitting one report each.
    pub async fn run(mut self) {
        info!("matching engine started");
        while let Some(intent) = self.intents.recv().await {
            debug!(
                side = %intent.side,
                limit = ?intent.limit_price,
                quantity = intent.quantity,
                "intent received"
            );
            let report = match self.execute(&intent) {
                Ok(fill) => {
                    info!(
                        side = %fill.side,
                        price = fill.price,
                        quantity = fill.quantity,
                        "intent executed"
                    );
                    ExecutionReport::Filled(fill)
                }
                Err(reason) => {
                    warn!(side = %intent.side, %reason, "intent rejected");
                    ExecutionReport::Rejected { intent, reason }
                }
            };
            if self.reports.send(report).await.is_err() {
                break;
            }
        }
        info!("matching engine stopped");
    }

    /// Decide how an intent executes against the current book.
    ///
    /// Market orders fill at the depth-weighted average or not at all. A
    /// limit order fills at its limit when reachable; otherwise it falls
    /// back to a market fill at the best achievable price. Nothing ever
    /// rests: no resting-order registry is maintained.
    pub fn execute(&self, intent: &TradeIntent) -> Result<Fill, RejectReason> {
        let price = match intent.limit_price {
            None => self
                .book
                .fill_price(intent.side, intent.quantity)
                .ok_or(RejectReason::InsufficientLiquidity)?,
            Some(limit) => {
                if self.book.can_fill(intent.side, limit, intent.quantity) {
                    limit
                } else {
                    let fallback = self
                        .book
                        .fill_price(intent.side, intent.quantity)
                        .ok_or(RejectReason::InsufficientLiquidity)?;
                    debug!(limit, fallback, "limit unreachable, taking market fill");
                    fallback
                }
            }
        };

        Ok(Fill {
            symbol: intent.symbol.clone(),
            side: intent.side,
            price,
            quantity: intent.quantity,
            filled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookSnapshot, PriceLevel};

    fn level(price: f64, quantity: f64) -> PriceLevel {
        PriceLevel { price, quantity }
    }

    fn test_engine() -> MatchingEngine {
        let book = Arc::new(OrderBook::new());
        book.replace(BookSnapshot {
            symbol: "BTCUSD".to_string(),
            timestamp: Utc::now(),
            bids: vec![level(50000.0, 1.0), level(49950.0, 2.0), level(49900.0, 1.5)],
            asks: vec![level(50100.0, 1.0), level(50150.0, 2.0), level(50200.0, 1.5)],
        });
        let (_intent_tx, intent_rx) = mpsc::channel(1);
        let (report_tx, _report_rx) = mpsc::channel(1);
        MatchingEngine::new(book, intent_rx, report_tx)
    }

    fn intent(side: Side, limit_price: Option<f64>, quantity: f64) -> TradeIntent {
        TradeIntent {
            symbol: "BTCUSD".to_string(),
            side,
            limit_price,
            quantity,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn market_buy_fills_at_weighted_ask_average() {
        let engine = test_engine();
        let fill = engine
            .execute(&intent(Side::Buy, None, 1.5))
            .expect("fillable");
        let expected = (1.0 * 50100.0 + 0.5 * 50150.0) / 1.5;
        assert!((fill.price - expected).abs() < 0.01);
        assert_eq!(fill.quantity, 1.5);
        assert_eq!(fill.side, Side::Buy);
    }

    #[test]
    fn market_sell_fills_at_weighted_bid_average() {
        let engine = test_engine();
        let fill = engine
            .execute(&intent(Side::Sell, None, 1.5))
            .expect("fillable");
        let expected = (1.0 * 50000.0 + 0.5 * 49950.0) / 1.5;
        assert!((fill.price - expected).abs() < 0.01);
    }

    #[test]
    fn reachable_limit_fills_at_limit_price() {
        let engine = test_engine();
        let fill = engine
            .execute(&intent(Side::Buy, Some(50150.0), 1.0))
            .expect("fillable");
        assert_eq!(fill.price, 50150.0);
    }

    #[test]
    fn unreachable_limit_falls_back_to_market_never_rests() {
        let engine = test_engine();
        // Priced below every ask; a real venue would rest it.
        let fill = engine
            .execute(&intent(Side::Buy, Some(49000.0), 1.0))
            .expect("falls back to market fill");
        assert_ne!(fill.price, 49000.0);
        assert_eq!(fill.price, 50100.0);
    }

    #[test]
    fn market_order_rejected_on_insufficient_depth() {
        let engine = test_engine();
        let outcome = engine.execute(&intent(Side::Buy, None, 10.0));
        assert_eq!(outcome, Err(RejectReason::InsufficientLiquidity));
    }

    #[test]
    fn limit_order_rejected_when_fallback_also_fails() {
        let engine = test_engine();
        let outcome = engine.execute(&intent(Side::Sell, Some(60000.0), 10.0));
        assert_eq!(outcome, Err(RejectReason::InsufficientLiquidity));
    }
}
