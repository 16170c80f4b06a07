// Local event-log schema — table creation.
//
// Mirrors the hosted table's columns so the same InterestEvent rows flow
// through both backends. `clicked_at` is stored as RFC 3339 text.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create the event-log table if it doesn't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- One row per join-beta click; append-only
        CREATE TABLE IF NOT EXISTS interest_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            country TEXT,
            city TEXT,
            ip_address TEXT,
            clicked_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_interest_events_clicked_at
            ON interest_events(clicked_at);
        ",
    )
    .context("Failed to create event-log tables")?;

    Ok(())
}
