// Public IP lookup — a single best-effort GET returning `{"ip": "..."}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::LOOKUP_TIMEOUT;

#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn public_ip(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

pub struct PublicIpClient {
    client: reqwest::Client,
    url: String,
}

impl PublicIpClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("handl-site/0.1")
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl IpLookup for PublicIpClient {
    async fn public_ip(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("IP lookup request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("IP lookup returned {}", response.status());
        }

        let body: IpResponse = response
            .json()
            .await
            .context("IP lookup returned an unexpected body")?;

        let ip = body.ip.trim();
        if ip.is_empty() {
            anyhow::bail!("IP lookup returned an empty address");
        }
        Ok(ip.to_string())
    }
}
