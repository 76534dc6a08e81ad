//! Error types for the WHEP stream client

/// Result type alias using the WHEP Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or maintaining a WHEP stream
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The WHEP endpoint answered 404: nothing is publishing right now
    #[error("Stream offline: {0}")]
    StreamOffline(String),

    /// WHEP endpoint rejected the offer (non-2xx, non-404)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The reconnector was stopped while an attempt was in flight
    #[error("Stream stopped")]
    Stopped,

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Every negotiation failure feeds the retry loop except a bad
    /// configuration or an explicit stop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvalidConfig(_) | Error::Stopped)
    }

    /// Check if the endpoint reported the stream as offline (HTTP 404)
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::StreamOffline(_))
    }
}
