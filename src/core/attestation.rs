/// Attestation checks against a HyperBEAM confidential-compute node

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::utils::truncate_string;

/// Length of the attestation preview shown next to a message
pub const PREVIEW_CHARS: usize = 100;

pub fn preview(attestation: &str) -> String {
    truncate_string(attestation, PREVIEW_CHARS)
}

/// Only a literal JSON `true` counts as verified
pub fn is_verified(body: &Value) -> bool {
    *body == Value::Bool(true)
}

pub struct AttestationVerifier {
    client: Client,
    base_url: String,
}

impl AttestationVerifier {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn verify_url(&self) -> String {
        format!("{}/~cc@1.0/verify", self.base_url)
    }

    /// Submit the attestation as-is; `Ok(false)` when the node rejects it
    pub async fn verify(&self, attestation: &str) -> Result<bool> {
        if attestation.trim().is_empty() {
            return Err(anyhow!("Message has no attestation"));
        }

        let response = self
            .client
            .post(self.verify_url())
            .header("Content-Type", "application/json")
            .body(attestation.to_string())
            .send()
            .await
            .context("Failed to verify attestation")?;

        let body: Value = response
            .json()
            .await
            .context("Failed to verify attestation")?;
        debug!(?body, "attestation verification reply");

        Ok(is_verified(&body))
    }
}
