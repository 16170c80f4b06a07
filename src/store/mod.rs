// Event-log layer — the append-only table of join-beta clicks.
//
// One `Arc<dyn EventLog>` is built at startup from the configuration and
// handed to every component that needs it (counter, recorder, web state).
// Backends: the hosted Supabase table, or a local SQLite file selected with
// `SUPABASE_URL=sqlite:<path>`.

pub mod models;
pub mod supabase;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use models::{InterestEvent, Location};
pub use traits::{EventLog, InsertFeed};

use std::sync::Arc;

use anyhow::Result;
#[cfg(feature = "sqlite")]
use anyhow::Context;
use tracing::info;

use crate::config::{Config, StoreBackend};

/// Build the event log selected by the configuration.
pub fn open_event_log(config: &Config) -> Result<Arc<dyn EventLog>> {
    let log: Arc<dyn EventLog> = match config.store_backend() {
        StoreBackend::Supabase => Arc::new(supabase::SupabaseEventLog::new(
            &config.store_url,
            &config.store_key,
            &config.event_table,
        )?),
        StoreBackend::Sqlite(path) => open_sqlite(&path)?,
    };
    info!(backend = log.name(), table = %config.event_table, "Event log ready");
    Ok(log)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &str) -> Result<Arc<dyn EventLog>> {
    Ok(Arc::new(initialize_sqlite(path)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &str) -> Result<Arc<dyn EventLog>> {
    anyhow::bail!(
        "SUPABASE_URL points to SQLite but the 'sqlite' feature is not compiled in.\n\
         Rebuild with: cargo build --features sqlite"
    )
}

/// Open (or create) a SQLite event log and run the schema setup.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<sqlite::SqliteEventLog> {
    use std::path::Path;

    // Create parent directories if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(sqlite::SqliteEventLog::new(conn))
}
