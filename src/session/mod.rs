//! One trading session: a feed, a book updater, a matching engine, a
//! strategy actor, and a report broadcaster wired around a single shared
//! book. Shutdown cascades by queue closure alone; nothing sleeps through a
//! grace period.

pub mod coordinator;
pub mod trade_log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::book::OrderBook;
use crate::broker::{ExecutionReport, MatchingEngine};
use crate::error::SessionError;
use crate::feed::{self, JsonFileFeed, OverflowPolicy, FEED_CADENCE};
use crate::strategy::{StrategyActor, StrategyConfig, StrategyTiming};
use crate::types::{Fill, Side};
use crate::updater::BookUpdater;

/// Per-session knobs, as consumed from the external CLI/config layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 0.0 means auto entry (market order).
    pub entry_price: f64,
    pub order_size: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub min_liquidity: f64,
    pub max_hold: Duration,
    pub output_path: PathBuf,
}

/// One fan-out unit for the coordinator.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub id: String,
    pub symbol: String,
    pub feed_path: PathBuf,
    pub config: SessionConfig,
}

/// Depth and overflow policy for every queue in the pipeline. The snapshot
/// intake drops on overflow so a slow consumer cannot stall the feed; the
/// intent and report queues block.
#[derive(Debug, Clone, Copy)]
pub struct QueueTuning {
    pub snapshot_depth: usize,
    pub snapshot_overflow: OverflowPolicy,
    pub intent_depth: usize,
    pub report_depth: usize,
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            snapshot_depth: 100,
            snapshot_overflow: OverflowPolicy::DropNewest,
            intent_depth: 16,
            report_depth: 16,
        }
    }
}

/// What a finished session reports back.
#[derive(Debug)]
pub struct SessionResult {
    pub session_id: String,
    pub fills: Vec<Fill>,
    pub total_pnl: f64,
    pub trade_count: usize,
    pub wall_duration: Duration,
    pub success: bool,
    pub error: Option<SessionError>,
}

impl SessionConfig {
    fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            entry_price: (self.entry_price != 0.0).then_some(self.entry_price),
            order_size: self.order_size,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            max_hold: self.max_hold,
            timing: StrategyTiming::default(),
        }
    }
}

/// Run one session to completion with default queue tuning.
pub async fn run_session(spec: SessionSpec, progress: Option<mpsc::Sender<String>>) -> SessionResult {
    run_session_with(spec, progress, QueueTuning::default()).await
}

/// Run one session to completion.
///
/// Termination is event-driven: the feed closes the snapshot queue, the
/// updater flags feed completion, the strategy finishes its bounded
/// lifecycle and drops the intent sender, the engine drains and closes the
/// report queue, and the broadcaster hands back the fill log.
pub async fn run_session_with(
    spec: SessionSpec,
    progress: Option<mpsc::Sender<String>>,
    tuning: QueueTuning,
) -> SessionResult {
    let started = Instant::now();
    info!(session = %spec.id, feed = %spec.feed_path.display(), "session starting");

    let book = Arc::new(OrderBook::new());
    let (snapshot_tx, snapshot_rx) = mpsc::channel(tuning.snapshot_depth);
    let (intent_tx, intent_rx) = mpsc::channel(tuning.intent_depth);
    let (report_tx, report_rx) = mpsc::channel(tuning.report_depth);
    let (strategy_report_tx, strategy_report_rx) = mpsc::channel(tuning.report_depth);
    let (feed_done_tx, feed_done_rx) = watch::channel(false);

    send_progress(&progress, format!("[{}] pipeline initialised", spec.id)).await;

    let feed = tokio::spawn(feed::publish(
        JsonFileFeed::new(&spec.feed_path),
        snapshot_tx,
        FEED_CADENCE,
        tuning.snapshot_overflow,
    ));
    let updater = tokio::spawn(BookUpdater::new(book.clone(), snapshot_rx, feed_done_tx).run());
    let engine = tokio::spawn(MatchingEngine::new(book.clone(), intent_rx, report_tx).run());
    let strategy = tokio::spawn(
        StrategyActor::new(
            spec.symbol.clone(),
            spec.config.strategy_config(),
            intent_tx,
            strategy_report_rx,
            feed_done_rx,
        )
        .run(),
    );
    let broadcaster = tokio::spawn(broadcast_reports(
        report_rx,
        strategy_report_tx,
        progress.clone(),
        spec.id.clone(),
    ));

    let feed_error = match feed.await {
        Ok(Ok(published)) => {
            send_progress(&progress, format!("[{}] feed completed ({published} snapshots)", spec.id))
                .await;
            None
        }
        Ok(Err(err)) => {
            warn!(session = %spec.id, %err, "feed failed to load");
            Some(SessionError::Feed(err))
        }
        Err(join_err) => {
            error!(session = %spec.id, %join_err, "feed task failed");
            None
        }
    };

    if let Err(join_err) = updater.await {
        error!(session = %spec.id, %join_err, "book updater task failed");
    }
    if let Err(join_err) = strategy.await {
        error!(session = %spec.id, %join_err, "strategy task failed");
    }
    if let Err(join_err) = engine.await {
        error!(session = %spec.id, %join_err, "matching engine task failed");
    }
    let fills = match broadcaster.await {
        Ok(fills) => fills,
        Err(join_err) => {
            error!(session = %spec.id, %join_err, "report broadcaster task failed");
            Vec::new()
        }
    };

    let total_pnl = realized_pnl(&fills);
    let persist_error = if fills.is_empty() {
        None
    } else {
        match trade_log::write_trade_log(&spec.config.output_path, &fills) {
            Ok(()) => {
                info!(
                    session = %spec.id,
                    path = %spec.config.output_path.display(),
                    "trade log written"
                );
                None
            }
            Err(err) => {
                warn!(session = %spec.id, %err, "failed to write trade log");
                Some(SessionError::Persistence(err))
            }
        }
    };

    let success = feed_error.is_none() && persist_error.is_none();
    let error = feed_error.or(persist_error);
    let trade_count = fills.len();
    let wall_duration = started.elapsed();
    info!(
        session = %spec.id,
        trades = trade_count,
        pnl = total_pnl,
        ?wall_duration,
        success,
        "session finished"
    );

    SessionResult {
        session_id: spec.id,
        fills,
        total_pnl,
        trade_count,
        wall_duration,
        success,
        error,
    }
}

/// Forward every execution report to the strategy and collect fills for the
/// session result. Keeps draining even after the strategy has gone away so
/// late fills still reach the log.
async fn broadcast_reports(
    mut reports: mpsc::Receiver<ExecutionReport>,
    strategy: mpsc::Sender<ExecutionReport>,
    progress: Option<mpsc::Sender<String>>,
    session_id: String,
) -> Vec<Fill> {
    let mut fills = Vec::new();
    while let Some(report) = reports.recv().await {
        if let ExecutionReport::Filled(fill) = &report {
            fills.push(fill.clone());
            send_progress(
                &progress,
                format!(
                    "[{session_id}] trade #{}: {} {:.2} @ {:.2}",
                    fills.len(),
                    fill.side,
                    fill.quantity,
                    fill.price
                ),
            )
            .await;
        }
        let _ = strategy.send(report).await;
    }
    fills
}

/// Sum of sell notional minus sum of buy notional.
fn realized_pnl(fills: &[Fill]) -> f64 {
    fills
        .iter()
        .map(|fill| match fill.side {
            Side::Buy => -fill.notional(),
            Side::Sell => fill.notional(),
        })
        .sum()
}

async fn send_progress(progress: &Option<mpsc::Sender<String>>, line: String) {
    if let Some(sink) = progress {
        let _ = sink.send(line).await;
    }
}
