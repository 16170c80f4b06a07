// Click recorder — appends one interest event per join-beta action.
//
// Recording is fire-and-forget: `record_click` spawns the work and returns
// immediately. Location and IP lookups degrade to nulls; an insert failure
// is logged and dropped.
//
// A click from the site is recorded against the visitor's address as seen
// by the server. Only the CLI asks the public-IP service, since there the
// clicking machine is this one.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::geo::{IpLookup, LocationResolver, PublicIpClient};
use crate::store::{EventLog, InterestEvent, Location};

/// Something that can record one click. The web and CLI layers only see
/// this, so tests can substitute a slow or failing sink.
#[async_trait]
pub trait ClickSink: Send + Sync {
    /// Record a click from `visitor_ip` (`None` when the address is unknown).
    async fn record(&self, visitor_ip: Option<IpAddr>) -> Result<()>;
}

/// Resolves location and IP, then inserts the event into the log.
pub struct ClickRecorder {
    resolver: LocationResolver,
    ip: Arc<dyn IpLookup>,
    log: Arc<dyn EventLog>,
}

impl ClickRecorder {
    pub fn new(resolver: LocationResolver, ip: Arc<dyn IpLookup>, log: Arc<dyn EventLog>) -> Self {
        Self { resolver, ip, log }
    }

    pub fn from_config(config: &Config, log: Arc<dyn EventLog>) -> Result<Self> {
        let resolver = LocationResolver::from_config(config)?;
        let ip = Arc::new(PublicIpClient::new(&config.ip_lookup_url)?);
        Ok(Self::new(resolver, ip, log))
    }

    /// Record a click from a site visitor, returning what was written.
    ///
    /// The location is looked up for `visitor_ip`, which is stored as-is.
    /// Without an address nothing is looked up and both stay null.
    pub async fn record_event(&self, visitor_ip: Option<IpAddr>) -> Result<InterestEvent> {
        let location = match visitor_ip {
            Some(ip) => self.resolver.resolve_location(Some(ip)).await,
            None => {
                debug!("Visitor address unknown; recording without location");
                Location::default()
            }
        };
        let event = InterestEvent::new(location, visitor_ip.map(|ip| ip.to_string()));
        self.insert(event).await
    }

    /// Record a click from this machine: its public IP and location are
    /// resolved concurrently. Only the insert can fail.
    pub async fn record_local_event(&self) -> Result<InterestEvent> {
        let (location, ip) = tokio::join!(self.resolver.resolve_location(None), self.ip.public_ip());

        let ip_address = match ip {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!(error = %e, "Public IP lookup failed; recording without IP");
                None
            }
        };

        self.insert(InterestEvent::new(location, ip_address)).await
    }

    async fn insert(&self, event: InterestEvent) -> Result<InterestEvent> {
        self.log
            .insert_event(&event)
            .await
            .with_context(|| format!("Failed to record click in {}", self.log.name()))?;

        info!(
            country = event.country.as_deref().unwrap_or("-"),
            city = event.city.as_deref().unwrap_or("-"),
            "Join click recorded"
        );
        Ok(event)
    }
}

#[async_trait]
impl ClickSink for ClickRecorder {
    async fn record(&self, visitor_ip: Option<IpAddr>) -> Result<()> {
        self.record_event(visitor_ip).await.map(|_| ())
    }
}

/// Dispatch one click record in the background. The handle is returned for
/// callers that want to wait (tests, the CLI); the join flow drops it.
pub fn record_click(sink: Arc<dyn ClickSink>, visitor_ip: Option<IpAddr>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.record(visitor_ip).await {
            warn!("Click record dropped: {e:#}");
        }
    })
}
