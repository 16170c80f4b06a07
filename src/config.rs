use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default table holding one row per join-beta click.
pub const DEFAULT_EVENT_TABLE: &str = "interest_clicks";

/// Default baseline added to the row count before it is displayed.
pub const DEFAULT_INTEREST_OFFSET: u64 = 100;

/// Prefix on `SUPABASE_URL` that selects the local SQLite event log.
pub const SQLITE_URL_PREFIX: &str = "sqlite:";

/// Which event-log backend the store URL points at.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// Hosted Supabase project (REST + Realtime)
    Supabase,
    /// Local SQLite file, path taken from after the `sqlite:` prefix
    Sqlite(String),
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded by `main` via dotenvy before this runs.
/// The two store values are mandatory: `load` fails without them and the
/// process does not start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted store base URL (SUPABASE_URL)
    pub store_url: String,
    /// Hosted store public ("anon") key (SUPABASE_ANON_KEY)
    pub store_key: String,
    /// Event-log table name
    pub event_table: String,
    /// Baseline offset K added to the row count
    pub interest_offset: u64,
    /// Interval for re-reading the row count in mounted counters (None = never)
    pub counter_resync: Option<Duration>,
    /// First geolocation provider (ipwho.is response shape)
    pub geo_primary_url: String,
    /// Second geolocation provider (ipapi.co response shape)
    pub geo_fallback_url: String,
    /// Public-IP lookup endpoint returning `{"ip": ".."}`
    pub ip_lookup_url: String,
    /// Deep-link target opened by the join action on qualifying devices
    pub join_url: Option<String>,
    /// Form-capture endpoint receiving the beta-signup POST
    pub form_endpoint: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_url = get("SUPABASE_URL");
        let store_key = get("SUPABASE_ANON_KEY");
        let (store_url, store_key) = match (store_url, store_key) {
            (Some(url), Some(key)) => (url, key),
            (url, key) => anyhow::bail!(
                "Missing store configuration (SUPABASE_URL set: {}, SUPABASE_ANON_KEY set: {}).\n\
                 Both values are required. Add them to your .env file.",
                url.is_some(),
                key.is_some()
            ),
        };

        let interest_offset = match get("HANDL_INTEREST_OFFSET") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("HANDL_INTEREST_OFFSET is not a number: {raw}"))?,
            None => DEFAULT_INTEREST_OFFSET,
        };

        let resync_secs = match get("HANDL_COUNTER_RESYNC_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("HANDL_COUNTER_RESYNC_SECS is not a number: {raw}"))?,
            None => 0,
        };

        Ok(Self {
            store_url: store_url.trim().trim_end_matches('/').to_string(),
            store_key: store_key.trim().to_string(),
            event_table: get("HANDL_EVENT_TABLE").unwrap_or_else(|| DEFAULT_EVENT_TABLE.to_string()),
            interest_offset,
            counter_resync: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            geo_primary_url: get("HANDL_GEO_PRIMARY_URL")
                .unwrap_or_else(|| crate::geo::DEFAULT_PRIMARY_URL.to_string()),
            geo_fallback_url: get("HANDL_GEO_FALLBACK_URL")
                .unwrap_or_else(|| crate::geo::DEFAULT_FALLBACK_URL.to_string()),
            ip_lookup_url: get("HANDL_IP_LOOKUP_URL")
                .unwrap_or_else(|| crate::geo::DEFAULT_IP_LOOKUP_URL.to_string()),
            join_url: get("HANDL_JOIN_URL"),
            form_endpoint: get("HANDL_FORM_ENDPOINT"),
        })
    }

    /// Which backend `store_url` selects.
    pub fn store_backend(&self) -> StoreBackend {
        match self.store_url.strip_prefix(SQLITE_URL_PREFIX) {
            Some(path) => StoreBackend::Sqlite(path.to_string()),
            None => StoreBackend::Supabase,
        }
    }

    /// Check that the deep-link target is configured.
    /// Call this before any operation that performs the join action.
    pub fn require_join_url(&self) -> Result<&str> {
        self.join_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "HANDL_JOIN_URL not set. Add the TestFlight/App Store link to your .env file."
            )
        })
    }

    /// Check that the form-capture endpoint is configured.
    /// Call this before submitting the beta-signup form.
    pub fn require_form_endpoint(&self) -> Result<&str> {
        self.form_endpoint.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "HANDL_FORM_ENDPOINT not set. Add the hosting provider's form endpoint to your .env file."
            )
        })
    }

    /// The store key with everything but the first few characters hidden.
    pub fn masked_key(&self) -> String {
        let visible: String = self.store_key.chars().take(6).collect();
        format!("{visible}…")
    }
}
