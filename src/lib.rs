// Handl: landing-site backend for the Handl beta
//
// This is the library root. Each module corresponds to one piece of the
// site's behavior: the interest counter and its feed, the join flow with
// its click recorder, and the signup relay.

pub mod config;
pub mod counter;
pub mod feed;
pub mod geo;
pub mod join;
pub mod output;
pub mod recorder;
pub mod signup;
pub mod status;
pub mod store;

#[cfg(feature = "web")]
pub mod web;
