//! Webhook Transmitter
//!
//! Posts the anchor as `{"subject", "body"}` JSON to an HTTP endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::transmit::Transmitter;

pub struct WebhookTransmitter {
    url: String,
    http_client: Client,
}

impl WebhookTransmitter {
    /// Create a webhook transmitter whose requests give up after `timeout`.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("Webhook URL must be http(s): {}", url));
        }
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { url, http_client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transmitter for WebhookTransmitter {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn transmit(&self, subject: &str, body: &str) -> Result<()> {
        debug!("Posting anchor to {}", self.url);

        let response = self
            .http_client
            .post(&self.url)
            .json(&json!({ "subject": subject, "body": body }))
            .send()
            .await
            .map_err(|e| anyhow!("Webhook request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Webhook returned HTTP {}", status));
        }

        info!("Anchor delivered to webhook ({})", status);
        Ok(())
    }
}
