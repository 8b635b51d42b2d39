//! HTTP signaling client
//!
//! One request per call: the offer goes out as the JSON body of
//! `POST {base_url}/api/watch`, the response body comes back as text and is
//! parsed into the remote description. No state survives between calls.

use crate::config::{SignalConfig, DEFAULT_REQUEST_TIMEOUT, WATCH_ROUTE};
use crate::error::{Error, Result};
use crate::negotiator::AnswerTransport;
use crate::peer::types::SessionDescription;
use crate::utils::join_url;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

/// Stateless client for a single signaling endpoint
#[derive(Debug, Clone)]
pub struct SignalingClient {
    /// Full URL of the watch route
    endpoint: String,
    client: reqwest::Client,
}

impl SignalingClient {
    /// Client for `base_url` with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn from_config(config: &SignalConfig) -> Result<Self> {
        Self::with_timeout(config.base_url.clone(), config.request_timeout)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();

        if base_url.is_empty() {
            return Err(Error::InvalidConfig(
                "signaling base_url cannot be empty".to_string(),
            ));
        }

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "signaling base_url must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: join_url(&base_url, WATCH_ROUTE),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `description` and returns the parsed remote description.
    pub async fn submit(&self, description: &SessionDescription) -> Result<SessionDescription> {
        debug!(endpoint = %self.endpoint, sdp_type = %description.sdp_type(), "submitting description");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(description.to_json())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(endpoint = %self.endpoint, %status, "signaling endpoint rejected the offer");
            return Err(Error::TransportUnavailable(format!(
                "{} returned {}: {}",
                self.endpoint, status, body
            )));
        }

        let answer = SessionDescription::from_json(&body).inspect_err(|_| {
            warn!(endpoint = %self.endpoint, len = body.len(), "response body is not a session description");
        })?;
        debug!(sdp_type = %answer.sdp_type(), "received remote description");
        Ok(answer)
    }
}

#[async_trait]
impl AnswerTransport for SignalingClient {
    async fn submit(&self, description: &SessionDescription) -> Result<SessionDescription> {
        SignalingClient::submit(self, description).await
    }
}
