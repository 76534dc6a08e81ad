//! Configuration types for the WHEP stream client

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default WHEP endpoint of the kaleidoscope camera
pub const DEFAULT_STREAM_URL: &str = "https://stream.kaleido.cam/kaleido-01/kaleidoscope/whep";

/// Main configuration for [`StreamReconnector`](crate::StreamReconnector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// WHEP endpoint the SDP offer is POSTed to (http:// or https://)
    pub stream_url: String,

    /// STUN server URLs (may be empty for host-only candidates)
    pub stun_servers: Vec<String>,

    /// Optional Bearer token sent with the offer
    pub auth_token: Option<String>,

    /// Delay before retrying after a transport failure (default: 2000ms)
    pub retry_delay_ms: u64,

    /// Delay before retrying after the endpoint reported 404 (default: 15000ms)
    pub offline_retry_delay_ms: u64,

    /// Timeout applied to the WHEP POST (default: 10000ms)
    pub request_timeout_ms: u64,

    /// Cap on consecutive failed attempts; `None` retries forever (default)
    pub max_attempts: Option<u32>,

    /// Wait for ICE gathering before sending the offer (non-trickle WHEP)
    pub wait_for_ice_gathering: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            auth_token: None,
            retry_delay_ms: 2000,
            offline_retry_delay_ms: 15000,
            request_timeout_ms: 10000,
            max_attempts: None,
            wait_for_ice_gathering: true,
        }
    }
}

impl StreamConfig {
    /// Create a configuration for the given WHEP endpoint with default timings
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stream_url` is not an http:// or https:// URL
    /// - `retry_delay_ms` or `offline_retry_delay_ms` is zero
    /// - `request_timeout_ms` is zero
    /// - `max_attempts` is `Some(0)`
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.stream_url.starts_with("http://") && !self.stream_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "stream_url must start with http:// or https://, got {}",
                self.stream_url
            )));
        }

        if self.retry_delay_ms == 0 || self.offline_retry_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "retry delays must be greater than zero".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1 when set".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Delay used after a transport failure
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay used after the endpoint reported the stream as offline
    pub fn offline_retry_delay(&self) -> Duration {
        Duration::from_millis(self.offline_retry_delay_ms)
    }

    /// Timeout for the WHEP POST
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the STUN servers
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the Bearer token sent with the offer
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set both retry delays
    pub fn with_retry_delays(mut self, retry: Duration, offline: Duration) -> Self {
        self.retry_delay_ms = retry.as_millis() as u64;
        self.offline_retry_delay_ms = offline.as_millis() as u64;
        self
    }

    /// Cap the number of consecutive failed attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_delay(), Duration::from_millis(2000));
        assert_eq!(config.offline_retry_delay(), Duration::from_millis(15000));
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn test_invalid_stream_url_fails() {
        let config = StreamConfig::new("ws://localhost:8889/whep");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_delay_fails() {
        let config = StreamConfig::default()
            .with_retry_delays(Duration::from_millis(0), Duration::from_millis(15000));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_attempts_fails() {
        let config = StreamConfig::default().with_max_attempts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_stun_server_fails() {
        let config =
            StreamConfig::default().with_stun_servers(vec!["turn:turn.example.com".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_partial_deserialization() {
        let config: StreamConfig =
            serde_json::from_str(r#"{"stream_url": "http://localhost:8889/cam/whep"}"#).unwrap();
        assert_eq!(config.stream_url, "http://localhost:8889/cam/whep");
        assert_eq!(config.retry_delay_ms, 2000);
        assert!(config.wait_for_ice_gathering);
    }
}
