use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring up a session's snapshot feed. Fatal to that session's
/// feed only: the snapshot queue closes immediately and downstream stages
/// drain to completion with zero trades.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read snapshot file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The error surfaced in a `SessionResult`. Either the feed never came up,
/// or the trade log could not be persisted. Neither affects sibling
/// sessions, and nothing is retried.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("feed load failed: {0}")]
    Feed(#[from] FeedError),
    #[error("trade log persistence failed: {0}")]
    Persistence(#[from] csv::Error),
}
