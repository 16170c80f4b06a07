// Location resolution over an ordered list of IP-geolocation providers.
//
// Lookups are for a given address (a site visitor) or, without one, for
// whichever machine makes the request (the CLI). Each provider gets one GET
// with a short timeout. A transport error, a non-2xx status, an unparseable
// body, or the provider's own failure flag all move on to the next provider. When the list is exhausted the result
// is an unknown location.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::LOOKUP_TIMEOUT;
use crate::config::Config;
use crate::store::Location;

/// A single geolocation lookup service.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Resolve the location of `ip`, or of the requesting machine when
    /// `ip` is `None`.
    async fn lookup(&self, ip: Option<IpAddr>) -> Result<Location>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

/// Extracts a location from a provider's JSON body. `None` means the
/// provider reported its own failure.
pub type ResponseParser = fn(&Value) -> Option<Location>;

/// Builds the lookup URL for a specific address from the provider's base URL.
pub type AddressUrl = fn(&str, IpAddr) -> String;

/// A JSON-over-HTTP provider with a provider-specific response shape.
pub struct HttpGeoProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    parse: ResponseParser,
    address_url: AddressUrl,
}

impl HttpGeoProvider {
    pub fn new(
        name: &str,
        url: &str,
        parse: ResponseParser,
        address_url: AddressUrl,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("handl-site/0.1")
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
            parse,
            address_url,
        })
    }

    /// ipwho.is: `{"success": bool, "country": .., "city": ..}`,
    /// per-address at `{base}/{ip}`.
    pub fn ipwhois(url: &str) -> Result<Self> {
        Self::new("ipwho.is", url, parse_ipwhois, ipwhois_address_url)
    }

    /// ipapi.co: `{"error": bool?, "country_name": .., "city": ..}`,
    /// per-address at `{root}/{ip}/json/`.
    pub fn ipapi(url: &str) -> Result<Self> {
        Self::new("ipapi.co", url, parse_ipapi, ipapi_address_url)
    }

    /// URL queried for `ip` (or the self-lookup URL for `None`).
    pub fn lookup_url(&self, ip: Option<IpAddr>) -> String {
        match ip {
            Some(ip) => (self.address_url)(&self.url, ip),
            None => self.url.clone(),
        }
    }
}

/// `https://ipwho.is/` → `https://ipwho.is/203.0.113.7`
pub fn ipwhois_address_url(base: &str, ip: IpAddr) -> String {
    format!("{}/{ip}", base.trim_end_matches('/'))
}

/// `https://ipapi.co/json/` → `https://ipapi.co/203.0.113.7/json/`
pub fn ipapi_address_url(base: &str, ip: IpAddr) -> String {
    let root = base.trim_end_matches('/');
    let root = root.strip_suffix("/json").unwrap_or(root);
    format!("{root}/{ip}/json/")
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: Option<IpAddr>) -> Result<Location> {
        let response = self
            .client
            .get(self.lookup_url(ip))
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned {}", self.name, response.status());
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", self.name))?;

        (self.parse)(&body).with_context(|| format!("{} reported a failed lookup", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse an ipwho.is body. An explicit `"success": false` is a failure.
pub fn parse_ipwhois(body: &Value) -> Option<Location> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    Some(Location {
        country: text_field(body, "country"),
        city: text_field(body, "city"),
    })
}

/// Parse an ipapi.co body. `"error": true` is a failure.
pub fn parse_ipapi(body: &Value) -> Option<Location> {
    if body.get("error").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    Some(Location {
        country: text_field(body, "country_name"),
        city: text_field(body, "city"),
    })
}

fn text_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Tries providers in order and returns the first usable location.
pub struct LocationResolver {
    providers: Vec<Arc<dyn GeoProvider>>,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(providers: Vec<Arc<dyn GeoProvider>>) -> Self {
        Self {
            providers,
            timeout: LOOKUP_TIMEOUT,
        }
    }

    /// Override the per-provider timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The two configured HTTP providers, primary first.
    pub fn from_config(config: &Config) -> Result<Self> {
        let primary: Arc<dyn GeoProvider> = Arc::new(HttpGeoProvider::ipwhois(&config.geo_primary_url)?);
        let fallback: Arc<dyn GeoProvider> = Arc::new(HttpGeoProvider::ipapi(&config.geo_fallback_url)?);
        Ok(Self::new(vec![primary, fallback]))
    }

    /// Resolve the coarse location of `ip` (or of this machine for `None`).
    /// Never fails; returns an unknown location when every provider fails
    /// or times out.
    pub async fn resolve_location(&self, ip: Option<IpAddr>) -> Location {
        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.lookup(ip)).await {
                Ok(Ok(location)) => {
                    debug!(provider = provider.name(), ?location, "Location resolved");
                    return location;
                }
                Ok(Err(e)) => {
                    debug!(provider = provider.name(), error = %e, "Geolocation provider failed");
                }
                Err(_) => {
                    debug!(provider = provider.name(), timeout = ?self.timeout, "Geolocation provider timed out");
                }
            }
        }

        warn!("All geolocation providers failed; recording unknown location");
        Location::default()
    }
}
