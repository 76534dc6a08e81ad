//! Error types for the control client

use crate::key::ControlKey;

/// Result type alias using the control Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by control channels, songs, scripts and console input
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The control socket is not connected
    #[error("Not connected to the control server")]
    Disconnected,

    /// The server rejected the value (HTTP 400)
    #[error("Invalid value: {message}")]
    Invalid { message: String },

    /// The server refused the change (HTTP 403)
    #[error("Permission denied")]
    Forbidden,

    /// The server failed (HTTP 5xx)
    #[error("Server error ({0})")]
    Server(u16),

    /// Any other non-2xx response
    #[error("Request rejected ({0})")]
    Rejected(u16),

    /// The request never reached the server
    #[error("Network error: {0}")]
    Network(String),

    /// Unknown control name
    #[error("Unknown control: {0}")]
    UnknownControl(String),

    /// Value outside the control's range
    #[error("{key} must be between {min} and {max}")]
    OutOfRange { key: ControlKey, min: i32, max: i32 },

    /// Note name not in the note table
    #[error("Unknown note: {0}")]
    UnknownNote(String),

    /// Song file that is not a JSON song
    #[error("Unsupported song file: {0}")]
    UnsupportedSong(String),

    /// Song that parses but cannot be played (timing out of range)
    #[error("Invalid song: {0}")]
    InvalidSong(String),

    /// Track index past the end of the song
    #[error("No track {0}")]
    UnknownTrack(usize),

    /// Console line that does not parse
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A performance was stopped by the user
    #[error("Script Stopped")]
    Stopped,

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Transport failures may succeed later; rejections of the value itself
    /// will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Disconnected | Error::Network(_) | Error::Server(_)
        )
    }

    /// Check if this is the user-stop sentinel
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }
}
