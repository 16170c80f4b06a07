// Data models — the rows of the event log.
//
// Kept separate from the backends so the counter, recorder and web layer
// can use them without depending on rusqlite or the hosted store client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One join-beta click. Immutable once written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestEvent {
    /// Row id assigned by the store (absent on rows not yet inserted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
    /// Visitor address as seen by the site, or this machine's public IP
    /// for clicks recorded from the CLI
    pub ip_address: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub clicked_at: DateTime<Utc>,
}

impl InterestEvent {
    /// Build a new, not-yet-stored event stamped with the current time.
    pub fn new(location: Location, ip_address: Option<String>) -> Self {
        Self {
            id: None,
            country: location.country,
            city: location.city,
            ip_address,
            clicked_at: Utc::now(),
        }
    }
}

/// Accept both `timestamptz` (RFC 3339) and zone-less `timestamp` renderings.
///
/// The REST API and the realtime feed render the column differently
/// depending on its declared type; zone-less values are taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
}

/// Parse a store timestamp (see `deserialize_timestamp`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Coarse geolocation of the caller. Both fields are null when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl Location {
    pub fn is_unknown(&self) -> bool {
        self.country.is_none() && self.city.is_none()
    }
}
