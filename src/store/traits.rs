// Event-log trait — backend-agnostic async interface to the append-only log.
//
// Implementors: SupabaseEventLog (hosted REST + Realtime), SqliteEventLog
// (local file with an in-process feed). The operations are count, append,
// a newest-first read for diagnostics, and a change feed scoped to inserts.
// Rows are never updated or deleted through this interface.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::models::InterestEvent;

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Current number of rows in the log.
    async fn count_rows(&self) -> Result<u64>;

    /// Append one event.
    async fn insert_event(&self, event: &InterestEvent) -> Result<()>;

    /// Up to `limit` most recent events, newest first.
    async fn recent_events(&self, limit: u32) -> Result<Vec<InterestEvent>>;

    /// Open a change feed delivering every row inserted from now on.
    async fn subscribe_inserts(&self) -> Result<InsertFeed>;

    /// Backend name (for logs and `handl status`).
    fn name(&self) -> &'static str;
}

/// Receiving end of an insert feed.
///
/// Events arrive in the order the backend delivers them. Dropping the feed
/// stops the backend worker that produces it (closing its connection).
pub struct InsertFeed {
    rx: mpsc::Receiver<InterestEvent>,
    worker: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl InsertFeed {
    /// Wrap a channel fed by `worker`. The worker is aborted when the feed drops.
    pub fn new(rx: mpsc::Receiver<InterestEvent>, worker: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            worker,
            shutdown: None,
        }
    }

    /// Wrap a channel fed by a worker that shuts itself down cleanly when
    /// `shutdown` fires (e.g. to leave a channel before closing a socket).
    pub fn with_shutdown(
        rx: mpsc::Receiver<InterestEvent>,
        worker: JoinHandle<()>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            rx,
            worker: Some(worker),
            shutdown: Some(shutdown),
        }
    }

    /// Next inserted event, or `None` once the backend has stopped the feed.
    pub async fn next(&mut self) -> Option<InterestEvent> {
        self.rx.recv().await
    }
}

impl Drop for InsertFeed {
    fn drop(&mut self) {
        self.rx.close();
        match self.shutdown.take() {
            Some(shutdown) => {
                // Worker already gone if the send fails; nothing left to stop.
                let _ = shutdown.send(());
            }
            None => {
                if let Some(worker) = self.worker.take() {
                    worker.abort();
                }
            }
        }
    }
}

/// Buffer between a backend worker and its feed consumer.
pub const FEED_BUFFER: usize = 256;
