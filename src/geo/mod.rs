// Visitor geolocation — best-effort country/city and public IP.
//
// Lookups never fail the caller: every provider error or timeout degrades
// to an unknown location (or no IP), which is still recorded.

pub mod provider;
pub mod public_ip;

pub use provider::{GeoProvider, HttpGeoProvider, LocationResolver};
pub use public_ip::{IpLookup, PublicIpClient};

/// Primary IP geolocation service.
pub const DEFAULT_PRIMARY_URL: &str = "https://ipwho.is/";

/// Fallback geolocation service, tried when the primary fails.
pub const DEFAULT_FALLBACK_URL: &str = "https://ipapi.co/json/";

/// Public-IP echo service.
pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

/// Per-request timeout for every geolocation or IP lookup.
pub const LOOKUP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
