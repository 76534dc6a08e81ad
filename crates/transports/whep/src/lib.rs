//! Self-healing WHEP stream client for the Kaleido panel
//!
//! Opens a receive-only WebRTC video connection to a WHEP endpoint and keeps
//! it alive: failed negotiations and dropped ICE connections are retried on a
//! timer, a 404 from the endpoint is reported as "offline" and retried
//! slowly, and every status change is published on a watch channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  StreamReconnector                                   │
//! │  ├─ ConnectionSlot (generation, peer, retry timer)   │
//! │  ├─ PeerFactory ──▶ PeerSession (webrtc-rs)          │
//! │  │     └─ PeerEvents (ICE state, track) ──┐          │
//! │  ├─ WhepSignaler (SDP offer ▶ answer)     │          │
//! │  └─ watch<StreamStatus> ◀─────────────────┘          │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use kaleido_whep::{StreamConfig, StreamStatus};
//!
//! let config = StreamConfig::new("http://localhost:8889/cam/whep");
//! assert!(config.validate().is_ok());
//!
//! let view = StreamStatus::Offline.view();
//! assert_eq!(view.text, "Offline");
//! assert!(view.offline_overlay);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use kaleido_whep::{StreamConfig, StreamReconnector, WebRtcPeerFactory};
//!
//! # async fn example() -> kaleido_whep::Result<()> {
//! let reconnector =
//!     StreamReconnector::with_webrtc(StreamConfig::default(), WebRtcPeerFactory::new())?;
//! let mut status = reconnector.subscribe();
//!
//! reconnector.start().await;
//! while status.changed().await.is_ok() {
//!     println!("{}", status.borrow().view().text);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod reconnect;
pub mod signaling;
pub mod status;

// Re-exports for public API
pub use config::{StreamConfig, DEFAULT_STREAM_URL};
pub use error::{Error, Result};
pub use peer::{
    PeerEvent, PeerEventSink, PeerEvents, PeerFactory, PeerSession, VideoPacket,
    WebRtcPeerFactory,
};
pub use reconnect::{RetryKind, StreamReconnector};
pub use signaling::{HttpWhepSignaler, WhepSignaler};
pub use status::{IceState, StatusView, StreamStatus};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
