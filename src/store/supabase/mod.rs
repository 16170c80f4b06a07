// Hosted event log — a Supabase table reached over PostgREST (count,
// insert, recent rows) and the Realtime websocket (insert feed).

pub mod realtime;
pub mod rest;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::models::InterestEvent;
use super::traits::{EventLog, InsertFeed};
use realtime::RealtimeTarget;
use rest::RestClient;

/// EventLog backed by a hosted Supabase project.
pub struct SupabaseEventLog {
    rest: RestClient,
    realtime: RealtimeTarget,
}

impl SupabaseEventLog {
    /// Build the client once at startup from the required store values.
    pub fn new(base_url: &str, key: &str, table: &str) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(base_url, key, table)?,
            realtime: RealtimeTarget::new(base_url, key, table),
        })
    }
}

#[async_trait]
impl EventLog for SupabaseEventLog {
    async fn count_rows(&self) -> Result<u64> {
        self.rest.count_rows().await
    }

    async fn insert_event(&self, event: &InterestEvent) -> Result<()> {
        self.rest.insert_event(event).await
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<InterestEvent>> {
        self.rest.recent_events(limit).await
    }

    async fn subscribe_inserts(&self) -> Result<InsertFeed> {
        info!(table = %self.realtime.table, "Opening realtime insert feed");
        Ok(realtime::spawn_feed(self.realtime.clone()))
    }

    fn name(&self) -> &'static str {
        "Supabase"
    }
}
