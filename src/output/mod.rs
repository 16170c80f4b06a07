// Output formatting — terminal display for the CLI.

pub mod terminal;

use crate::store::Location;

/// "City, Country", whichever parts are known, or "unknown".
pub fn format_location(location: &Location) -> String {
    match (location.city.as_deref(), location.country.as_deref()) {
        (Some(city), Some(country)) => format!("{city}, {country}"),
        (None, Some(country)) => country.to_string(),
        (Some(city), None) => city.to_string(),
        (None, None) => "unknown".to_string(),
    }
}
