//! Fan-out/fan-in over independent trading sessions. Each session runs in
//! its own task and reports through a results queue; progress lines flow
//! through a separate queue drained by a logger task. A failing session
//! never affects its siblings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{run_session, SessionResult, SessionSpec};

const PROGRESS_DEPTH: usize = 50;

/// Aggregate view over every session's result.
#[derive(Debug)]
pub struct AggregateSummary {
    pub results: Vec<SessionResult>,
    pub total_trades: usize,
    pub total_pnl: f64,
    pub successes: usize,
    pub wall_duration: Duration,
}

/// Launch every spec concurrently and collect all results. An empty spec
/// set returns immediately with zero aggregates.
pub async fn run_sessions(specs: Vec<SessionSpec>) -> AggregateSummary {
    let started = Instant::now();
    let count = specs.len();
    info!(sessions = count, "launching concurrent sessions");

    let (progress_tx, mut progress_rx) = mpsc::channel::<String>(PROGRESS_DEPTH);
    let (result_tx, mut result_rx) = mpsc::channel::<SessionResult>(count.max(1));

    for spec in specs {
        let progress = progress_tx.clone();
        let results = result_tx.clone();
        tokio::spawn(async move {
            let id = spec.id.clone();
            let _ = progress.send(format!("[{id}] session starting")).await;
            let result = run_session(spec, Some(progress.clone())).await;
            let _ = progress
                .send(format!(
                    "[{id}] completed in {:.2?} - {} trades",
                    result.wall_duration, result.trade_count
                ))
                .await;
            let _ = results.send(result).await;
        });
    }
    // Both queues close once every per-session sender is gone.
    drop(progress_tx);
    drop(result_tx);

    let reporter = tokio::spawn(async move {
        while let Some(line) = progress_rx.recv().await {
            info!("{line}");
        }
    });

    let mut results = Vec::with_capacity(count);
    while let Some(result) = result_rx.recv().await {
        if let Some(err) = &result.error {
            warn!(session = %result.session_id, %err, "session reported failure");
        }
        results.push(result);
    }
    let _ = reporter.await;

    let total_trades = results.iter().map(|r| r.trade_count).sum();
    let total_pnl = results.iter().map(|r| r.total_pnl).sum();
    let successes = results.iter().filter(|r| r.success).count();
    let wall_duration = started.elapsed();
    info!(
        sessions = results.len(),
        successes,
        total_trades,
        total_pnl,
        ?wall_duration,
        "all sessions finished"
    );

    AggregateSummary {
        results,
        total_trades,
        total_pnl,
        successes,
        wall_duration,
    }
}
