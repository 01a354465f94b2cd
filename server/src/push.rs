//! Push-delivery client.
//!
//! The push service takes one message addressed to many device tokens and
//! reports a per-token result. Delivery is not atomic: some tokens may
//! succeed while others fail.
//!
//! [`HttpPushClient`] speaks JSON over HTTP:
//!
//! ```text
//! POST {base}/v1/messages:multicast
//! Authorization: Bearer <api key>
//!
//! {"notification": {"title", "body"}, "data": {...}, "tokens": [...]}
//! -> {"successCount", "failureCount", "responses": [{"success", "error"?}]}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Errors that can occur when talking to the push service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The API key was rejected.
    #[error("unauthorized: push service rejected the API key")]
    Unauthorized,

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The push service is unreachable.
    #[error("push service unavailable: {0}")]
    Unavailable(String),

    /// The push service answered with an unexpected status or body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl PushError {
    /// Returns `true` if the service could not be reached in time.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Visible part of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// One message addressed to many device tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub notification: PushNotification,
    /// String key/value payload delivered to the app.
    pub data: BTreeMap<String, String>,
    pub tokens: Vec<String>,
}

/// Delivery result for one token, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a multicast send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastReport {
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(default)]
    pub responses: Vec<TokenResult>,
}

impl MulticastReport {
    /// Pairs failed results with the tokens they were sent to.
    #[must_use]
    pub fn failed_tokens(&self, tokens: &[String]) -> Vec<(String, Option<String>)> {
        self.responses
            .iter()
            .zip(tokens)
            .filter(|(result, _)| !result.success)
            .map(|(result, token)| (token.clone(), result.error.clone()))
            .collect()
    }
}

/// Push-delivery service.
#[async_trait]
pub trait PushService: Send + Sync {
    /// Sends `message` to every token in it.
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastReport, PushError>;
}

/// HTTP client for the push-delivery service.
#[derive(Clone)]
pub struct HttpPushClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpPushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPushClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpPushClient {
    /// Creates a new push client.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
            timeout,
        })
    }
}

#[async_trait]
impl PushService for HttpPushClient {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastReport, PushError> {
        let url = format!("{}/v1/messages:multicast", self.base_url);
        debug!(url = %url, tokens = message.tokens.len(), "Sending multicast push");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout(self.timeout)
                } else if e.is_connect() {
                    PushError::Unavailable(format!("connection failed: {e}"))
                } else {
                    PushError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PushError::Unauthorized);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Push service failed");
            return Err(PushError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Unexpected response from push service");
            return Err(PushError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let report: MulticastReport = response.json().await.map_err(|e| {
            PushError::InvalidResponse(format!("failed to parse multicast report: {e}"))
        })?;

        debug!(
            success = report.success_count,
            failure = report.failure_count,
            "Multicast push sent"
        );
        Ok(report)
    }
}
