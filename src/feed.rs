use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::error::FeedError;
use crate::types::BookSnapshot;

/// Cadence at which loaded snapshots are replayed to simulate a live feed.
pub const FEED_CADENCE: Duration = Duration::from_millis(100);

/// What the publisher does when the intake queue is full. The snapshot
/// intake defaults to `DropNewest` so a slow consumer cannot stall a live
/// feed; every other queue in the pipeline blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Block,
    DropNewest,
}

/// Where snapshots come from. The pipeline only cares that a full batch can
/// be loaded up front; replay pacing is the publisher's job.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load(&self) -> Result<Vec<BookSnapshot>, FeedError>;
}

/// Reads a JSON file holding either an array of snapshots or a single
/// snapshot object.
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for JsonFileFeed {
    async fn load(&self) -> Result<Vec<BookSnapshot>, FeedError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FeedError::Io {
                path: self.path.clone(),
                source,
            })?;

        match serde_json::from_slice::<Vec<BookSnapshot>>(&raw) {
            Ok(batch) => Ok(batch),
            // Not an array; retry as a single snapshot object.
            Err(_) => serde_json::from_slice::<BookSnapshot>(&raw)
                .map(|snapshot| vec![snapshot])
                .map_err(|source| FeedError::Parse {
                    path: self.path.clone(),
                    source,
                }),
        }
    }
}

/// Load the source and replay its snapshots into the intake queue on the
/// feed cadence, re-stamping timestamps onto a load-time base so downstream
/// sees a real-time progression. Returns the number published. A load
/// failure closes the queue immediately (by returning), which is how
/// downstream stages observe it.
pub async fn publish<S: SnapshotSource>(
    source: S,
    snapshots: mpsc::Sender<BookSnapshot>,
    cadence: Duration,
    policy: OverflowPolicy,
) -> Result<usize, FeedError> {
    let batch = source.load().await?;
    info!(count = batch.len(), "feed loaded");

    let base = Utc::now();
    let step = chrono::Duration::milliseconds(cadence.as_millis() as i64);
    let mut ticker = tokio::time::interval(cadence);
    let mut published = 0usize;

    for (index, mut snapshot) in batch.into_iter().enumerate() {
        ticker.tick().await;
        snapshot.timestamp = base + step * index as i32;

        match policy {
            OverflowPolicy::Block => {
                if snapshots.send(snapshot).await.is_err() {
                    warn!(index, "snapshot queue closed, stopping feed");
                    break;
                }
                published += 1;
            }
            OverflowPolicy::DropNewest => match snapshots.try_send(snapshot) {
                Ok(()) => published += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(index, "snapshot queue saturated, dropping snapshot");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(index, "snapshot queue closed, stopping feed");
                    break;
                }
            },
        }
    }

    info!(published, "feed completed");
    Ok(published)
}
