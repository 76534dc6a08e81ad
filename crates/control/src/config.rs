//! Configuration for the control client

use crate::sync::{RateLimit, Rotation};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which transport carries control changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Persistent WebSocket with server pushes
    WebSocket,
    /// `POST /api/state` per change
    Rest,
}

impl std::str::FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(ChannelKind::WebSocket),
            "rest" | "http" => Ok(ChannelKind::Rest),
            other => Err(Error::InvalidConfig(format!("unknown channel kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    Debounce,
    Throttle,
}

impl std::str::FromStr for RateLimitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debounce" => Ok(RateLimitMode::Debounce),
            "throttle" => Ok(RateLimitMode::Throttle),
            other => Err(Error::InvalidConfig(format!("unknown rate limit: {}", other))),
        }
    }
}

/// Control client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Transport for control changes (default: websocket)
    pub channel: ChannelKind,

    /// Control socket URL (ws:// or wss://)
    pub socket_url: String,

    /// Base URL of the REST API (http:// or https://)
    pub api_base_url: String,

    /// Rate limiting strategy (default: debounce)
    pub rate_limit: RateLimitMode,

    /// Quiet period or window; `None` uses 250ms (debounce) or 150ms (throttle)
    pub rate_limit_ms: Option<u64>,

    /// Motor frequency used by the rotate buttons (default: 1000)
    pub rotate_speed: i32,

    /// How long the rotate buttons spin the motor (default: 1000ms)
    pub rotate_duration_ms: u64,

    /// Delay before reconnecting a closed control socket (default: 2000ms)
    pub socket_reconnect_delay_ms: u64,

    /// Timeout for REST requests (default: 30000ms)
    pub request_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::WebSocket,
            socket_url: "ws://localhost:5000/ws".to_string(),
            api_base_url: "http://localhost:5000".to_string(),
            rate_limit: RateLimitMode::Debounce,
            rate_limit_ms: None,
            rotate_speed: 1000,
            rotate_duration_ms: 1000,
            socket_reconnect_delay_ms: 2000,
            request_timeout_ms: 30000,
        }
    }
}

impl ControlConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the URL of the selected channel has the wrong scheme
    /// - `rate_limit_ms` is `Some(0)`
    /// - `rotate_speed` is outside the motor's frequency range or zero
    /// - any duration is zero
    pub fn validate(&self) -> Result<()> {
        match self.channel {
            ChannelKind::WebSocket => {
                if !self.socket_url.starts_with("ws://") && !self.socket_url.starts_with("wss://") {
                    return Err(Error::InvalidConfig(format!(
                        "socket_url must start with ws:// or wss://, got {}",
                        self.socket_url
                    )));
                }
            }
            ChannelKind::Rest => {
                if !self.api_base_url.starts_with("http://")
                    && !self.api_base_url.starts_with("https://")
                {
                    return Err(Error::InvalidConfig(format!(
                        "api_base_url must start with http:// or https://, got {}",
                        self.api_base_url
                    )));
                }
            }
        }

        if self.rate_limit_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "rate_limit_ms must be greater than zero".to_string(),
            ));
        }

        if self.rotate_speed == 0
            || crate::ControlKey::Frequency.check(self.rotate_speed).is_err()
        {
            return Err(Error::InvalidConfig(format!(
                "rotate_speed must be a non-zero motor frequency, got {}",
                self.rotate_speed
            )));
        }

        if self.rotate_duration_ms == 0
            || self.socket_reconnect_delay_ms == 0
            || self.request_timeout_ms == 0
        {
            return Err(Error::InvalidConfig(
                "durations must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Rate limit with defaults applied
    pub fn rate_limit(&self) -> RateLimit {
        match (self.rate_limit, self.rate_limit_ms) {
            (RateLimitMode::Debounce, None) => RateLimit::debounce(),
            (RateLimitMode::Throttle, None) => RateLimit::throttle(),
            (RateLimitMode::Debounce, Some(ms)) => RateLimit::Debounce(Duration::from_millis(ms)),
            (RateLimitMode::Throttle, Some(ms)) => RateLimit::Throttle(Duration::from_millis(ms)),
        }
    }

    pub fn rotation(&self) -> Rotation {
        Rotation {
            speed: self.rotate_speed,
            duration: Duration::from_millis(self.rotate_duration_ms),
        }
    }

    pub fn socket_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.socket_reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
