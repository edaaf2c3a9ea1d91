use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::broker::ExecutionReport;
use crate::types::{Position, Side, TradeIntent};

/// Delays driving the actor's lifecycle. The defaults carry the simulation's
/// fixed trigger schedule: entries settle for half a second, a take-profit
/// check fires two seconds into a position, a stop-loss check one second
/// after that.
#[derive(Debug, Clone, Copy)]
pub struct StrategyTiming {
    pub settle_delay: Duration,
    pub take_profit_delay: Duration,
    pub stop_loss_delay: Duration,
}

impl Default for StrategyTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            take_profit_delay: Duration::from_secs(2),
            stop_loss_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Limit entry when set; market entry otherwise.
    pub entry_price: Option<f64>,
    pub order_size: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_hold: Duration,
    pub timing: StrategyTiming,
}

/// Which exit trigger won the arbitration race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    MaxHold,
    TakeProfit,
    StopLoss,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::MaxHold => f.write_str("max-hold"),
            ExitReason::TakeProfit => f.write_str("take-profit"),
            ExitReason::StopLoss => f.write_str("stop-loss"),
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    /// A position is open and the exit arbitration race is armed.
    Open {
        position: Position,
        opened_at: Instant,
    },
    /// The exit intent is in flight; no triggers are armed any more.
    Closing {
        position: Position,
    },
}

/// Owns one position's lifecycle: emits the entry intent, opens the position
/// on its Buy fill, races the exit triggers, emits exactly one Sell intent,
/// and realises PnL on the Sell fill.
///
/// The position lives inside this task only. Exit triggers are futures in
/// the actor's own `select!` loop: whichever fires first wins and the
/// others are dropped, so a position can never attract a second exit intent.
pub struct StrategyActor {
    symbol: String,
    config: StrategyConfig,
    intents: mpsc::Sender<TradeIntent>,
    reports: mpsc::Receiver<ExecutionReport>,
    feed_done: watch::Receiver<bool>,
    state: State,
    in_flight: usize,
    entry_sent: bool,
    feed_finished: bool,
}

impl StrategyActor {
    pub fn new(
        symbol: impl Into<String>,
        config: StrategyConfig,
        intents: mpsc::Sender<TradeIntent>,
        reports: mpsc::Receiver<ExecutionReport>,
        feed_done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            intents,
            reports,
            feed_done,
            state: State::Idle,
            in_flight: 0,
            entry_sent: false,
            feed_finished: false,
        }
    }

    /// Run the lifecycle to completion. The loop ends once the entry has
    /// been sent, every intent has been reported on, no position remains
    /// open, and the feed has finished, or immediately when the report
    /// queue closes. Completion is observed, never slept for.
    pub async fn run(mut self) {
        info!(symbol = %self.symbol, "strategy started");

        tokio::time::sleep(self.config.timing.settle_delay).await;
        if !self.submit_entry().await {
            return;
        }

        loop {
            if self.lifecycle_complete() {
                break;
            }

            let (exit_armed, opened_at) = match &self.state {
                State::Open { opened_at, .. } => (true, *opened_at),
                _ => (false, Instant::now()),
            };
            let take_profit =
                (self.config.take_profit_pct > 0.0).then_some(self.config.timing.take_profit_delay);
            let stop_loss =
                (self.config.stop_loss_pct > 0.0).then_some(self.config.timing.stop_loss_delay);
            let max_hold = self.config.max_hold;

            tokio::select! {
                report = self.reports.recv() => match report {
                    Some(report) => self.on_report(report),
                    None => break,
                },
                reason = exit_race(opened_at, max_hold, take_profit, stop_loss), if exit_armed => {
                    self.submit_exit(reason).await;
                }
                changed = self.feed_done.changed(), if !self.feed_finished => {
                    self.feed_finished = changed.is_err() || *self.feed_done.borrow();
                }
            }
        }

        info!(symbol = %self.symbol, "strategy finished");
    }

    fn lifecycle_complete(&self) -> bool {
        self.entry_sent
            && self.in_flight == 0
            && matches!(self.state, State::Idle)
            && self.feed_finished
    }

    async fn submit_entry(&mut self) -> bool {
        match self.config.entry_price {
            Some(price) => info!(price, size = self.config.order_size, "submitting limit entry"),
            None => info!(size = self.config.order_size, "submitting market entry"),
        }
        let intent = TradeIntent {
            symbol: self.symbol.clone(),
            side: Side::Buy,
            limit_price: self.config.entry_price,
            quantity: self.config.order_size,
            created_at: Utc::now(),
        };
        if self.intents.send(intent).await.is_err() {
            warn!("intent queue closed before entry");
            return false;
        }
        self.entry_sent = true;
        self.in_flight += 1;
        true
    }

    async fn submit_exit(&mut self, reason: ExitReason) {
        let position = match std::mem::replace(&mut self.state, State::Idle) {
            State::Open { position, .. } => position,
            other => {
                self.state = other;
                return;
            }
        };
        info!(%reason, quantity = position.quantity, "submitting exit");
        let intent = TradeIntent {
            symbol: position.symbol.clone(),
            side: Side::Sell,
            limit_price: None,
            quantity: position.quantity,
            created_at: Utc::now(),
        };
        if self.intents.send(intent).await.is_err() {
            warn!("intent queue closed before exit");
            return;
        }
        self.in_flight += 1;
        self.state = State::Closing { position };
    }

    fn on_report(&mut self, report: ExecutionReport) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match report {
            ExecutionReport::Filled(fill) => match (&self.state, fill.side) {
                (State::Idle, Side::Buy) => {
                    info!(price = fill.price, quantity = fill.quantity, "position opened");
                    self.state = State::Open {
                        position: Position {
                            symbol: fill.symbol,
                            quantity: fill.quantity,
                            entry_price: fill.price,
                            entry_time: fill.filled_at,
                        },
                        opened_at: Instant::now(),
                    };
                }
                (State::Open { .. } | State::Closing { .. }, Side::Sell) => {
                    let position = match std::mem::replace(&mut self.state, State::Idle) {
                        State::Open { position, .. } | State::Closing { position } => position,
                        State::Idle => unreachable!(),
                    };
                    let pnl = (fill.price - position.entry_price) * fill.quantity;
                    let held = fill.filled_at - position.entry_time;
                    info!(
                        price = fill.price,
                        pnl,
                        held_ms = held.num_milliseconds(),
                        "position closed"
                    );
                }
                (_, side) => {
                    warn!(%side, "fill does not match position state, ignoring");
                }
            },
            ExecutionReport::Rejected { intent, reason } => match (&self.state, intent.side) {
                (State::Closing { position }, Side::Sell) => {
                    warn!(
                        %reason,
                        quantity = position.quantity,
                        "exit rejected, abandoning position"
                    );
                    self.state = State::Idle;
                }
                (_, Side::Buy) => {
                    warn!(%reason, "entry rejected");
                }
                (_, side) => {
                    debug!(%side, %reason, "rejection does not match position state");
                }
            },
        }
    }
}

/// Race the armed exit triggers; first completion wins and the rest are
/// cancelled by drop.
async fn exit_race(
    opened_at: Instant,
    max_hold: Duration,
    take_profit: Option<Duration>,
    stop_loss: Option<Duration>,
) -> ExitReason {
    tokio::select! {
        _ = sleep_until(opened_at + max_hold) => ExitReason::MaxHold,
        _ = sleep_until(opened_at + take_profit.unwrap_or(max_hold)), if take_profit.is_some() => {
            ExitReason::TakeProfit
        }
        _ = sleep_until(opened_at + stop_loss.unwrap_or(max_hold)), if stop_loss.is_some() => {
            ExitReason::StopLoss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RejectReason;
    use crate::types::Fill;

    fn test_config(entry_price: Option<f64>) -> StrategyConfig {
        StrategyConfig {
            entry_price,
            order_size: 2.0,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            max_hold: Duration::from_secs(5),
            timing: StrategyTiming {
                settle_delay: Duration::from_millis(10),
                take_profit_delay: Duration::from_millis(50),
                stop_loss_delay: Duration::from_millis(80),
            },
        }
    }

    struct Harness {
        intents: mpsc::Receiver<TradeIntent>,
        reports: mpsc::Sender<ExecutionReport>,
        feed_done: watch::Sender<bool>,
        actor: tokio::task::JoinHandle<()>,
    }

    fn spawn_actor(config: StrategyConfig) -> Harness {
        let (intent_tx, intent_rx) = mpsc::channel(4);
        let (report_tx, report_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = watch::channel(false);
        let actor = StrategyActor::new("BTCUSD", config, intent_tx, report_rx, done_rx);
        Harness {
            intents: intent_rx,
            reports: report_tx,
            feed_done: done_tx,
            actor: tokio::spawn(actor.run()),
        }
    }

    fn fill(side: Side, price: f64, quantity: f64) -> ExecutionReport {
        ExecutionReport::Filled(Fill {
            symbol: "BTCUSD".to_string(),
            side,
            price,
            quantity,
            filled_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn market_entry_when_no_entry_price() {
        let mut harness = spawn_actor(test_config(None));
        let entry = harness.intents.recv().await.expect("entry intent");
        assert_eq!(entry.side, Side::Buy);
        assert_eq!(entry.limit_price, None);
        assert_eq!(entry.quantity, 2.0);

        harness
            .reports
            .send(ExecutionReport::Rejected {
                intent: entry,
                reason: RejectReason::InsufficientLiquidity,
            })
            .await
            .unwrap();
        harness.feed_done.send(true).unwrap();
        harness.actor.await.unwrap();
    }

    #[tokio::test]
    async fn limit_entry_when_entry_price_configured() {
        let mut harness = spawn_actor(test_config(Some(3000.0)));
        let entry = harness.intents.recv().await.expect("entry intent");
        assert_eq!(entry.limit_price, Some(3000.0));

        harness
            .reports
            .send(ExecutionReport::Rejected {
                intent: entry,
                reason: RejectReason::InsufficientLiquidity,
            })
            .await
            .unwrap();
        harness.feed_done.send(true).unwrap();
        harness.actor.await.unwrap();
    }

    #[tokio::test]
    async fn full_lifecycle_emits_exactly_one_exit() {
        let mut harness = spawn_actor(test_config(None));
        let entry = harness.intents.recv().await.expect("entry intent");
        assert_eq!(entry.side, Side::Buy);

        harness.feed_done.send(true).unwrap();
        harness.reports.send(fill(Side::Buy, 100.0, 2.0)).await.unwrap();

        // Take-profit delay (50ms) beats both stop-loss and max-hold.
        let exit = harness.intents.recv().await.expect("exit intent");
        assert_eq!(exit.side, Side::Sell);
        assert_eq!(exit.limit_price, None);
        assert_eq!(exit.quantity, 2.0);

        harness.reports.send(fill(Side::Sell, 105.0, 2.0)).await.unwrap();
        harness.actor.await.unwrap();

        // Actor exited; nothing else was ever sent.
        assert!(harness.intents.try_recv().is_err());
    }

    #[tokio::test]
    async fn max_hold_fires_when_no_pct_triggers_armed() {
        let mut config = test_config(None);
        config.take_profit_pct = 0.0;
        config.stop_loss_pct = 0.0;
        config.max_hold = Duration::from_millis(40);
        let mut harness = spawn_actor(config);

        let _entry = harness.intents.recv().await.expect("entry intent");
        harness.feed_done.send(true).unwrap();
        harness.reports.send(fill(Side::Buy, 100.0, 2.0)).await.unwrap();

        let exit = harness.intents.recv().await.expect("exit intent");
        assert_eq!(exit.side, Side::Sell);

        harness.reports.send(fill(Side::Sell, 99.0, 2.0)).await.unwrap();
        harness.actor.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_exit_abandons_position_and_terminates() {
        let mut harness = spawn_actor(test_config(None));
        let _entry = harness.intents.recv().await.expect("entry intent");
        harness.feed_done.send(true).unwrap();
        harness.reports.send(fill(Side::Buy, 100.0, 2.0)).await.unwrap();

        let exit = harness.intents.recv().await.expect("exit intent");
        harness
            .reports
            .send(ExecutionReport::Rejected {
                intent: exit,
                reason: RejectReason::InsufficientLiquidity,
            })
            .await
            .unwrap();

        harness.actor.await.unwrap();
        assert!(harness.intents.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminates_when_feed_done_sender_dropped() {
        let mut harness = spawn_actor(test_config(None));
        let entry = harness.intents.recv().await.expect("entry intent");
        harness
            .reports
            .send(ExecutionReport::Rejected {
                intent: entry,
                reason: RejectReason::InsufficientLiquidity,
            })
            .await
            .unwrap();
        drop(harness.feed_done);
        harness.actor.await.unwrap();
    }
}
