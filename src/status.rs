// System status display — backend, table, baseline and the live count.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::config::{Config, StoreBackend};
use crate::output::terminal;
use crate::store::EventLog;

/// Number of recent clicks listed under the summary.
const RECENT_LIMIT: u32 = 5;

/// Display system status to the terminal.
pub async fn show(config: &Config, log: &Arc<dyn EventLog>) -> Result<()> {
    match config.store_backend() {
        StoreBackend::Supabase => {
            println!("Store: {} ({})", log.name(), config.store_url);
            println!("Key: {}", config.masked_key());
        }
        StoreBackend::Sqlite(path) => {
            if !Path::new(&path).exists() {
                println!("Store: SQLite at {path} (not initialized)");
                println!("\nRun `handl init` to create it.");
                return Ok(());
            }
            let file_size = std::fs::metadata(&path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Store: SQLite at {path} ({file_size})");
        }
    }
    println!("Table: {}", config.event_table);

    let rows = log.count_rows().await;
    match &rows {
        Ok(rows) => println!("Recorded clicks: {rows}"),
        Err(e) => println!("Recorded clicks: {} ({e:#})", "unavailable".red()),
    }
    println!(
        "Shown to visitors: {} (baseline {})",
        shown_count(rows.as_ref().ok().copied(), config.interest_offset)
            .to_string()
            .bold(),
        config.interest_offset
    );

    match config.counter_resync {
        Some(every) => println!("Counter resync: every {}s", every.as_secs()),
        None => println!("Counter resync: off"),
    }
    println!(
        "Join link: {}",
        config.join_url.as_deref().unwrap_or("not set (HANDL_JOIN_URL)")
    );
    println!(
        "Signup endpoint: {}",
        config
            .form_endpoint
            .as_deref()
            .unwrap_or("not set (HANDL_FORM_ENDPOINT)")
    );

    match log.recent_events(RECENT_LIMIT).await {
        Ok(events) => terminal::display_recent_events(&events),
        Err(e) => println!("\nRecent clicks: {} ({e:#})", "unavailable".red()),
    }
    Ok(())
}

/// What visitors see for a given row count; the baseline alone when the
/// count is unavailable.
fn shown_count(rows: Option<u64>, offset: u64) -> u64 {
    rows.map_or(offset, |rows| rows.saturating_add(offset))
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
