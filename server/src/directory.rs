//! Profile directory client.
//!
//! [`RestDirectory`] reads user profiles from the directory REST API and
//! implements [`ProfileDirectory`], so the fan-out handler can run against it
//! or against any other directory (such as the in-memory store in tests).
//!
//! # Endpoints
//!
//! - `GET {base}/v1/users` returns `{"users": [UserProfile, ...]}`
//! - `GET {base}/v1/users/{id}` returns a `UserProfile`, or 404 if unknown
//!
//! Every request carries the API key in the `apikey` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use sipsync_core::error::SyncError;
use sipsync_core::store::ProfileDirectory;
use sipsync_core::types::UserProfile;
use thiserror::Error;
use tracing::{debug, error};

/// Errors that can occur when talking to the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The API key was rejected.
    #[error("unauthorized: directory rejected the API key")]
    Unauthorized,

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The directory is unreachable.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The directory answered with an unexpected status or body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error, such as an invalid base URL or TLS setup.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl From<DirectoryError> for SyncError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unauthorized => SyncError::permission_denied(err.to_string()),
            DirectoryError::Timeout(limit) => SyncError::Timeout(limit),
            DirectoryError::Unavailable(_)
            | DirectoryError::InvalidResponse(_)
            | DirectoryError::Configuration(_) => SyncError::unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserProfile>,
}

/// REST client for the profile directory.
#[derive(Clone)]
pub struct RestDirectory {
    http_client: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for RestDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDirectory")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RestDirectory {
    /// Creates a new directory client.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Configuration`] if `base_url` is not an
    /// absolute URL or the HTTP client cannot be created.
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url.as_ref()).map_err(|e| {
            DirectoryError::Configuration(format!("invalid directory URL: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Configuration(format!(
                "directory URL cannot carry a path: {base_url}"
            )));
        }

        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            DirectoryError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Fetches one profile; `None` if the directory does not know the user.
    ///
    /// # Errors
    ///
    /// Any [`DirectoryError`] other than a 404.
    pub async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError> {
        let url = self.users_url(Some(user_id));
        debug!(url = %url, "Fetching user profile");

        let response = self.get(url).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(user_id, "Profile not found");
            return Ok(None);
        }
        let response = self.check_status(response).await?;

        let profile: UserProfile = response.json().await.map_err(|e| {
            DirectoryError::InvalidResponse(format!("failed to parse profile: {e}"))
        })?;
        Ok(Some(profile))
    }

    /// Fetches every profile.
    ///
    /// # Errors
    ///
    /// Any [`DirectoryError`].
    pub async fn fetch_profiles(&self) -> Result<Vec<UserProfile>, DirectoryError> {
        let url = self.users_url(None);
        debug!(url = %url, "Fetching user profiles");

        let response = self.get(url).await?;
        let response = self.check_status(response).await?;

        let users: UsersResponse = response.json().await.map_err(|e| {
            DirectoryError::InvalidResponse(format!("failed to parse users response: {e}"))
        })?;

        debug!(count = users.users.len(), "Fetched user profiles");
        Ok(users.users)
    }

    /// `{base}/v1/users`, plus the percent-encoded user id when given.
    fn users_url(&self, user_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["v1", "users"]);
            if let Some(user_id) = user_id {
                segments.push(user_id);
            }
        }
        url
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, DirectoryError> {
        self.http_client
            .get(url)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DirectoryError::Timeout(self.timeout)
                } else if e.is_connect() {
                    DirectoryError::Unavailable(format!("connection failed: {e}"))
                } else {
                    DirectoryError::Unavailable(format!("request failed: {e}"))
                }
            })
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, DirectoryError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DirectoryError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Unexpected response from directory");
            return Err(DirectoryError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProfileDirectory for RestDirectory {
    async fn get_profile(&self, user_id: &str) -> sipsync_core::Result<Option<UserProfile>> {
        Ok(self.fetch_profile(user_id).await?)
    }

    async fn list_profiles(&self) -> sipsync_core::Result<Vec<UserProfile>> {
        Ok(self.fetch_profiles().await?)
    }
}
