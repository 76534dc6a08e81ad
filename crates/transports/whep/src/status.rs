//! Stream status and its presentation
//!
//! `StreamStatus` is what the reconnector publishes; `StatusView` is the pure
//! mapping to what an indicator shows (class, text, offline overlay, whether
//! the dependent controls are usable).

use serde::{Deserialize, Serialize};

/// Lifecycle status of the live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Not started, or stopped
    Idle,
    /// Negotiation in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Transport lost, retry scheduled
    Reconnecting,
    /// Endpoint reported no stream (or gave up), long retry scheduled
    Offline,
}

/// What a status indicator shows for a given [`StreamStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    /// CSS-like class of the indicator dot
    pub indicator_class: &'static str,
    /// Human-readable status text
    pub text: &'static str,
    /// Whether the "offline" overlay covers the video
    pub offline_overlay: bool,
    /// Whether controls depending on the stream are enabled
    pub controls_enabled: bool,
}

impl StreamStatus {
    /// Presentation of this status
    pub fn view(self) -> StatusView {
        match self {
            StreamStatus::Connected => StatusView {
                indicator_class: "connected",
                text: "Live",
                offline_overlay: false,
                controls_enabled: true,
            },
            StreamStatus::Reconnecting => StatusView {
                indicator_class: "reconnecting",
                text: "Connection lost. Retrying...",
                offline_overlay: false,
                controls_enabled: false,
            },
            StreamStatus::Connecting => StatusView {
                indicator_class: "reconnecting",
                text: "Connecting...",
                offline_overlay: false,
                controls_enabled: false,
            },
            StreamStatus::Idle | StreamStatus::Offline => StatusView {
                indicator_class: "error",
                text: "Offline",
                offline_overlay: true,
                controls_enabled: false,
            },
        }
    }

    /// Short lowercase name, used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Idle => "idle",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Connected => "connected",
            StreamStatus::Reconnecting => "reconnecting",
            StreamStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE connection state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    /// States after which the connection has to be renegotiated
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IceState::Disconnected | IceState::Failed | IceState::Closed
        )
    }
}
