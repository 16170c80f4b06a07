// Colored terminal output for counts, locations and recorded clicks.
//
// main.rs and status.rs delegate their display work here.

use colored::Colorize;

use super::format_location;
use crate::counter::CounterState;
use crate::store::{InterestEvent, Location};

/// Print the interest count the site would show.
pub fn display_count(value: u64, offset: u64) {
    println!("{} {}", value.to_string().bold().green(), "interested".dimmed());
    println!(
        "  {}",
        format!("({} recorded + {} baseline)", value.saturating_sub(offset), offset).dimmed()
    );
}

/// One line per counter change during `handl watch`.
pub fn display_watch_tick(value: u64, previous: Option<u64>) {
    let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
    match previous {
        Some(prev) if value > prev => println!(
            "  {}  {} {}",
            stamp.dimmed(),
            value.to_string().bold().green(),
            format!("(+{})", value - prev).green()
        ),
        _ => println!("  {}  {}", stamp.dimmed(), value.to_string().bold()),
    }
}

pub fn display_counter_state(state: CounterState) {
    let label = match state {
        CounterState::Uninitialized => "connecting".yellow(),
        CounterState::Live => "live".green().bold(),
        CounterState::Unmounted => "stopped".dimmed(),
    };
    println!("Counter: {label}");
}

pub fn display_location(location: &Location, ip: Option<&str>) {
    let place = format_location(location);
    if location.is_unknown() {
        println!("Location: {}", place.yellow());
    } else {
        println!("Location: {}", place.bold());
    }
    match ip {
        Some(ip) => println!("Public IP: {ip}"),
        None => println!("Public IP: {}", "unavailable".yellow()),
    }
}

/// Display a click that was just written to the log.
pub fn display_recorded(event: &InterestEvent) {
    let location = Location {
        country: event.country.clone(),
        city: event.city.clone(),
    };
    println!("{} Click recorded", "✓".green().bold());
    println!("  Location:  {}", format_location(&location));
    println!(
        "  IP:        {}",
        event.ip_address.as_deref().unwrap_or("-")
    );
    println!(
        "  Clicked:   {}",
        event.clicked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

/// Recent rows from a local log, newest first.
pub fn display_recent_events(events: &[InterestEvent]) {
    if events.is_empty() {
        println!("Recent clicks: none recorded yet");
        println!("  Run `handl record` to add one");
        return;
    }
    println!("Recent clicks: {} most recent:", events.len());
    for event in events {
        let location = Location {
            country: event.country.clone(),
            city: event.city.clone(),
        };
        println!(
            "  {}  {}",
            event.clicked_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            format_location(&location)
        );
    }
}
