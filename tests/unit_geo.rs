// Location resolver tests — provider ordering, timeouts, and the
// all-failed fallback, using in-process providers (no network).

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use handl::geo::provider::{parse_ipapi, parse_ipwhois, ResponseParser};
use handl::geo::{GeoProvider, LocationResolver};
use handl::store::Location;

/// Answers with a canned JSON body run through a real response parser.
struct CannedProvider {
    body: Value,
    parse: ResponseParser,
    calls: AtomicUsize,
    seen: Mutex<Vec<Option<IpAddr>>>,
}

impl CannedProvider {
    fn new(body: Value, parse: ResponseParser) -> Arc<Self> {
        Arc::new(Self {
            body,
            parse,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl GeoProvider for CannedProvider {
    async fn lookup(&self, ip: Option<IpAddr>) -> Result<Location> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(ip);
        (self.parse)(&self.body).context("provider reported failure")
    }

    fn name(&self) -> &str {
        "canned"
    }
}

/// Never answers within any reasonable timeout.
struct HangingProvider;

#[async_trait]
impl GeoProvider for HangingProvider {
    async fn lookup(&self, _ip: Option<IpAddr>) -> Result<Location> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Location {
            country: Some("Nowhere".into()),
            city: None,
        })
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

struct FailingProvider;

#[async_trait]
impl GeoProvider for FailingProvider {
    async fn lookup(&self, _ip: Option<IpAddr>) -> Result<Location> {
        anyhow::bail!("connection refused")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn canada_toronto() -> Location {
    Location {
        country: Some("Canada".into()),
        city: Some("Toronto".into()),
    }
}

// ============================================================
// Fallback chain
// ============================================================

#[tokio::test]
async fn timeout_on_first_provider_falls_back_to_second() {
    let fallback = CannedProvider::new(
        json!({"country_name": "Canada", "city": "Toronto"}),
        parse_ipapi,
    );
    let providers: Vec<Arc<dyn GeoProvider>> = vec![Arc::new(HangingProvider), fallback.clone()];
    let resolver = LocationResolver::new(providers).with_timeout(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let location = resolver.resolve_location(None).await;

    assert_eq!(location, canada_toronto());
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn all_providers_failing_yields_unknown_location() {
    let flagged = CannedProvider::new(json!({"error": true, "reason": "RateLimited"}), parse_ipapi);
    let providers: Vec<Arc<dyn GeoProvider>> =
        vec![Arc::new(HangingProvider), Arc::new(FailingProvider), flagged];
    let resolver = LocationResolver::new(providers).with_timeout(Duration::from_millis(50));

    let location = resolver.resolve_location(None).await;
    assert_eq!(location, Location::default());
    assert!(location.is_unknown());
}

#[tokio::test]
async fn first_success_short_circuits() {
    let primary = CannedProvider::new(
        json!({"success": true, "country": "Canada", "city": "Toronto"}),
        parse_ipwhois,
    );
    let fallback = CannedProvider::new(
        json!({"country_name": "France", "city": "Paris"}),
        parse_ipapi,
    );
    let providers: Vec<Arc<dyn GeoProvider>> = vec![primary.clone(), fallback.clone()];
    let resolver = LocationResolver::new(providers);

    assert_eq!(resolver.resolve_location(None).await, canada_toronto());
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_failure_flag_advances_to_next() {
    let primary = CannedProvider::new(json!({"success": false}), parse_ipwhois);
    let fallback = CannedProvider::new(
        json!({"country_name": "Canada", "city": "Toronto"}),
        parse_ipapi,
    );
    let providers: Vec<Arc<dyn GeoProvider>> = vec![primary, fallback];
    let resolver = LocationResolver::new(providers);

    assert_eq!(resolver.resolve_location(None).await, canada_toronto());
}

#[tokio::test]
async fn visitor_address_reaches_every_provider_tried() {
    let primary = CannedProvider::new(json!({"success": false}), parse_ipwhois);
    let fallback = CannedProvider::new(
        json!({"country_name": "Canada", "city": "Toronto"}),
        parse_ipapi,
    );
    let providers: Vec<Arc<dyn GeoProvider>> = vec![primary.clone(), fallback.clone()];
    let resolver = LocationResolver::new(providers);
    let visitor: IpAddr = "203.0.113.7".parse().unwrap();

    assert_eq!(resolver.resolve_location(Some(visitor)).await, canada_toronto());
    assert_eq!(*primary.seen.lock().unwrap(), vec![Some(visitor)]);
    assert_eq!(*fallback.seen.lock().unwrap(), vec![Some(visitor)]);
}

#[tokio::test]
async fn no_providers_yields_unknown_location() {
    let resolver = LocationResolver::new(Vec::new());
    assert!(resolver.resolve_location(None).await.is_unknown());
}

// ============================================================
// Response parsers
// ============================================================

#[test]
fn missing_fields_are_null() {
    let location = parse_ipwhois(&json!({"success": true})).unwrap();
    assert_eq!(location, Location::default());

    let location = parse_ipapi(&json!({"country_name": "Canada"})).unwrap();
    assert_eq!(location.country.as_deref(), Some("Canada"));
    assert_eq!(location.city, None);
}

#[test]
fn ipwhois_without_success_flag_is_accepted() {
    let location = parse_ipwhois(&json!({"country": "Canada", "city": "Toronto"})).unwrap();
    assert_eq!(location, canada_toronto());
}
