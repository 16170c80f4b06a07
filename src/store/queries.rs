// Local event-log queries — plain functions over a rusqlite Connection.
//
// SqliteEventLog calls these under its mutex; tests call them directly.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::models::{parse_timestamp, InterestEvent};

/// Number of rows in the event log.
pub fn count_events(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM interest_events", [], |row| row.get(0))
        .context("Failed to count interest events")?;
    Ok(count.max(0) as u64)
}

/// Append one event and return the stored row (with its assigned id).
pub fn insert_event(conn: &Connection, event: &InterestEvent) -> Result<InterestEvent> {
    conn.execute(
        "INSERT INTO interest_events (country, city, ip_address, clicked_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.country,
            event.city,
            event.ip_address,
            event.clicked_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert interest event")?;

    let mut stored = event.clone();
    stored.id = Some(conn.last_insert_rowid());
    Ok(stored)
}

/// Most recent events, newest first.
pub fn recent_events(conn: &Connection, limit: u32) -> Result<Vec<InterestEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, country, city, ip_address, clicked_at
         FROM interest_events
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, country, city, ip_address, clicked_at) = row?;
        let clicked_at = parse_timestamp(&clicked_at)
            .with_context(|| format!("Corrupt clicked_at on event {id}: {clicked_at}"))?;
        events.push(InterestEvent {
            id: Some(id),
            country,
            city,
            ip_address,
            clicked_at,
        });
    }
    Ok(events)
}
