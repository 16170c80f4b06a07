// Beta signup relay — forwards the `beta-signup` form to the hosting
// provider's form-capture endpoint.
//
// This is the only path whose failures reach the visitor, and then only as
// a generic retry message.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Form name the capture service files submissions under.
pub const FORM_NAME: &str = "beta-signup";

/// Shown to the visitor on any submission failure.
pub const RETRY_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl SignupForm {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Reject blank names and obviously malformed emails.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Please enter your name.");
        }
        if !is_plausible_email(self.email.trim()) {
            anyhow::bail!("Please enter a valid email address.");
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Client for the form-capture endpoint.
pub struct FormCapture {
    client: reqwest::Client,
    endpoint: String,
}

impl FormCapture {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("handl-site/0.1")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Submit the form URL-encoded. Any 2xx is success.
    pub async fn submit(&self, form: &SignupForm) -> Result<()> {
        let body = [
            ("form-name", FORM_NAME),
            ("name", form.name.trim()),
            ("email", form.email.trim()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .form(&body)
            .send()
            .await
            .context("Signup submission failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Form capture returned {}", response.status());
        }

        info!(form = FORM_NAME, "Beta signup submitted");
        Ok(())
    }
}
