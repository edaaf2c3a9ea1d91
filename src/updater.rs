use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::book::OrderBook;
use crate::types::BookSnapshot;

/// Applies feed snapshots to the shared book. The only writer the book ever
/// has; everything else holds read queries.
pub struct BookUpdater {
    book: Arc<OrderBook>,
    snapshots: mpsc::Receiver<BookSnapshot>,
    feed_done: watch::Sender<bool>,
}

impl BookUpdater {
    pub fn new(
        book: Arc<OrderBook>,
        snapshots: mpsc::Receiver<BookSnapshot>,
        feed_done: watch::Sender<bool>,
    ) -> Self {
        Self {
            book,
            snapshots,
            feed_done,
        }
    }

    /// Consume snapshots until the intake queue closes, then flag feed
    /// completion for the strategy. Returns how many updates were applied.
    pub async fn run(mut self) -> u64 {
        info!("book updater started");
        let mut applied = 0u64;

        while let Some(snapshot) = self.snapshots.recv().await {
            self.book.replace(snapshot);
            applied += 1;

            if applied % 10 == 0 {
                debug!(
                    applied,
                    best_bid = ?self.book.best_bid(),
                    best_ask = ?self.book.best_ask(),
                    spread = ?self.book.spread(),
                    updated_at = ?self.book.last_updated(),
                    "book update progress"
                );
            }
        }

        info!(symbol = %self.book.symbol(), applied, "book updater finished");
        let _ = self.feed_done.send(true);
        applied
    }
}
