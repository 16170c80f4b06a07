// PostgREST client for the hosted event-log table.
//
// Calls used: an exact row count (HEAD + `Prefer: count=exact`, the total
// comes back in `Content-Range`), a single-row insert, and a newest-first
// select for `handl status`. All carry the project's public key in `apikey`
// and as a bearer token.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use tracing::debug;

use crate::store::models::InterestEvent;

/// Thin reqwest wrapper around `{base}/rest/v1/{table}`.
pub struct RestClient {
    client: reqwest::Client,
    table_url: String,
}

impl RestClient {
    /// Create a client for `table` on the project at `base_url`.
    pub fn new(base_url: &str, key: &str, table: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key_value =
            HeaderValue::from_str(key).context("Store key contains invalid header characters")?;
        let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .context("Store key contains invalid header characters")?;
        headers.insert("apikey", key_value);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .user_agent("handl-site/0.1")
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
        })
    }

    /// Exact number of rows in the table.
    pub async fn count_rows(&self) -> Result<u64> {
        let response = self
            .client
            .head(&self.table_url)
            .query(&[("select", "*")])
            .header("Prefer", "count=exact")
            .send()
            .await
            .context("Store count request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Store count returned {}", response.status());
        }

        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .context("Store count response has no Content-Range header")?
            .to_str()
            .context("Content-Range header is not valid text")?;

        let total = parse_content_range_total(range)?;
        debug!(total, "Store row count");
        Ok(total)
    }

    /// Insert one row. Any 2xx response is success.
    pub async fn insert_event(&self, event: &InterestEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(event)
            .send()
            .await
            .context("Store insert request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Store insert returned {status}: {body}");
        }

        Ok(())
    }

    /// Up to `limit` rows, newest first.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<InterestEvent>> {
        let response = self
            .client
            .get(&self.table_url)
            .query(&[
                ("select", "*".to_string()),
                ("order", "id.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("Store select request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Store select returned {status}: {body}");
        }

        response
            .json::<Vec<InterestEvent>>()
            .await
            .context("Store select returned unexpected rows")
    }
}

/// Extract the total from a `Content-Range` value such as `0-24/57` or `*/0`.
pub fn parse_content_range_total(raw: &str) -> Result<u64> {
    let (_, total) = raw
        .trim()
        .rsplit_once('/')
        .with_context(|| format!("Malformed Content-Range: {raw}"))?;
    total
        .parse::<u64>()
        .with_context(|| format!("Content-Range has no exact total: {raw}"))
}
