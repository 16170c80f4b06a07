// SqliteEventLog — rusqlite backend implementing the EventLog trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
//
// The insert feed is an in-process broadcast channel: every successful
// insert through this handle is published to all open feeds. Rows written
// by other processes sharing the file are counted but not announced.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

use super::models::InterestEvent;
use super::traits::{EventLog, InsertFeed, FEED_BUFFER};

/// Capacity of the broadcast channel behind the insert feed.
const BROADCAST_CAPACITY: usize = 1024;

pub struct SqliteEventLog {
    conn: Mutex<Connection>,
    inserts: broadcast::Sender<InterestEvent>,
}

impl SqliteEventLog {
    /// Wrap an already-opened rusqlite Connection (tables must exist).
    pub fn new(conn: Connection) -> Self {
        let (inserts, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            inserts,
        }
    }

    /// In-memory log with the schema applied. Used by tests and demos.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn count_rows(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        super::queries::count_events(&conn)
    }

    async fn insert_event(&self, event: &InterestEvent) -> Result<()> {
        let stored = {
            let conn = self.conn.lock().await;
            super::queries::insert_event(&conn, event)?
        };
        debug!(id = ?stored.id, "Interest event stored");

        // No open feeds is not an error.
        let _ = self.inserts.send(stored);
        Ok(())
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<InterestEvent>> {
        let conn = self.conn.lock().await;
        super::queries::recent_events(&conn, limit)
    }

    async fn subscribe_inserts(&self) -> Result<InsertFeed> {
        // Subscribe before spawning so inserts racing this call are not lost.
        let mut source = self.inserts.subscribe();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let worker = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Insert feed fell behind; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(InsertFeed::new(rx, Some(worker)))
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }
}
