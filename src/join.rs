// Join-beta flow — deep link for qualifying devices, signup form otherwise.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::recorder::{record_click, ClickSink};

/// Device family, as far as the join flow cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// iPhone, iPad or iPod: can open the beta install link
    Ios,
    Other,
}

impl Platform {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ["iphone", "ipad", "ipod"].iter().any(|d| ua.contains(d)) {
            Platform::Ios
        } else {
            Platform::Other
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Navigate to this URL now
    DeepLink(String),
    /// Present the beta signup form
    ShowSignup,
}

pub struct JoinFlow {
    join_url: String,
    sink: Arc<dyn ClickSink>,
}

impl JoinFlow {
    pub fn new(join_url: impl Into<String>, sink: Arc<dyn ClickSink>) -> Self {
        Self {
            join_url: join_url.into(),
            sink,
        }
    }

    /// Handle one join action from `visitor_ip`. For iOS the click record is
    /// dispatched in the background and the deep link is returned without
    /// waiting on it.
    pub fn join(&self, user_agent: &str, visitor_ip: Option<IpAddr>) -> JoinOutcome {
        match Platform::from_user_agent(user_agent) {
            Platform::Ios => {
                // Detached; the handle is dropped on purpose.
                let _ = record_click(Arc::clone(&self.sink), visitor_ip);
                debug!("Join from iOS device; deep linking");
                JoinOutcome::DeepLink(self.join_url.clone())
            }
            Platform::Other => {
                debug!("Join from non-iOS device; showing signup");
                JoinOutcome::ShowSignup
            }
        }
    }
}
