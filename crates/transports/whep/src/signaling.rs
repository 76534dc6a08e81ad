//! WHEP signaling
//!
//! WHEP is a single HTTP exchange: POST the SDP offer
//! (`Content-Type: application/sdp`), read the SDP answer from the body.
//! A 404 means nothing is publishing on that path.

use crate::config::StreamConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Exchanges an SDP offer for an SDP answer
#[async_trait]
pub trait WhepSignaler: Send + Sync {
    /// POST `offer_sdp` to `url` and return the answer SDP
    ///
    /// # Errors
    ///
    /// - [`Error::StreamOffline`] when the endpoint answers 404
    /// - [`Error::SignalingError`] for any other non-2xx status
    /// - [`Error::HttpError`] when the request itself fails
    async fn negotiate(&self, url: &str, offer_sdp: String) -> Result<String>;
}

/// reqwest-backed WHEP signaler
pub struct HttpWhepSignaler {
    /// Optional Bearer token
    auth_token: Option<String>,

    /// Reqwest HTTP client
    client: reqwest::Client,
}

impl HttpWhepSignaler {
    /// Create a signaler using the timeout and token from `config`
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            auth_token: config.auth_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl WhepSignaler for HttpWhepSignaler {
    async fn negotiate(&self, url: &str, offer_sdp: String) -> Result<String> {
        debug!(%url, bytes = offer_sdp.len(), "POST WHEP offer");

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::StreamOffline(format!("{} returned 404", url)));
        }

        if !status.is_success() {
            return Err(Error::SignalingError(format!(
                "Server returned {}",
                status.as_u16()
            )));
        }

        let answer = response.text().await?;
        debug!(bytes = answer.len(), "Received WHEP answer");

        Ok(answer)
    }
}
