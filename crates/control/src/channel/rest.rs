//! REST control channel
//!
//! - `POST {base}/api/state` with `{"<key>": <value>}` applies a change
//! - `GET {base}/api/state` returns `{"brightness": .., "frequency": ..}`

use super::ControlChannel;
use crate::key::ControlChange;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Current values as reported by `GET /api/state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    pub brightness: i32,
    pub frequency: i32,
}

/// Body of a 400 response
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the control server's state endpoint
pub struct RestChannel {
    /// Base URL (e.g., "http://localhost:5000")
    base_url: String,

    /// Reqwest HTTP client
    client: reqwest::Client,
}

impl RestChannel {
    /// Create a client for `base_url` (http:// or https://)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "api_base_url must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn state_url(&self) -> String {
        format!("{}/api/state", self.base_url)
    }

    /// Read the current values
    pub async fn fetch_state(&self) -> Result<RemoteState> {
        let response = self
            .client
            .get(self.state_url())
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::rejection(status, response).await);
        }

        response
            .json::<RemoteState>()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse state: {}", e)))
    }

    /// Map a non-2xx response onto an error
    async fn rejection(status: StatusCode, response: reqwest::Response) -> Error {
        match status {
            StatusCode::BAD_REQUEST => {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.message.or(body.error))
                    .unwrap_or_else(|| "rejected by server".to_string());
                Error::Invalid { message }
            }
            StatusCode::FORBIDDEN => Error::Forbidden,
            s if s.is_server_error() => Error::Server(s.as_u16()),
            s => Error::Rejected(s.as_u16()),
        }
    }
}

#[async_trait]
impl ControlChannel for RestChannel {
    async fn send(&self, change: ControlChange) -> Result<()> {
        debug!(%change, "[API] Change");

        let mut body = serde_json::Map::new();
        body.insert(change.key.as_str().to_string(), change.value.into());

        let response = self
            .client
            .post(self.state_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::rejection(status, response).await)
        }
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
