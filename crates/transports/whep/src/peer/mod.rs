//! Peer connection abstraction
//!
//! The reconnector only needs four things from a peer connection: make an
//! offer, take an answer, close, and report ICE/track events. Those sit
//! behind [`PeerFactory`] and [`PeerSession`] so the state machine can be
//! driven without a network in tests.

pub mod connection;

pub use connection::{VideoPacket, WebRtcPeerFactory};

use crate::config::StreamConfig;
use crate::status::IceState;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Event raised by a peer connection's handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// ICE connection state changed
    IceStateChanged(IceState),
    /// A remote media track arrived
    TrackReceived {
        /// MIME type of the track codec (e.g. "video/H264")
        mime_type: String,
    },
}

/// Receiver of peer events, tagged with the connection generation
pub trait PeerEventSink: Send + Sync {
    fn on_peer_event(&self, generation: u64, event: PeerEvent);
}

/// Handle given to a peer connection so its callbacks can report back
///
/// Carries the generation of the connection it was created for; the sink
/// drops events whose generation is no longer current.
#[derive(Clone)]
pub struct PeerEvents {
    generation: u64,
    sink: Arc<dyn PeerEventSink>,
}

impl PeerEvents {
    pub fn new(generation: u64, sink: Arc<dyn PeerEventSink>) -> Self {
        Self { generation, sink }
    }

    /// Generation of the connection these events belong to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event
    pub fn emit(&self, event: PeerEvent) {
        self.sink.on_peer_event(self.generation, event);
    }
}

/// One negotiated (or negotiating) receive-only peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Create the local offer, apply it, and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply the endpoint's SDP answer as remote description
    async fn set_remote_answer(&self, sdp: String) -> Result<()>;

    /// Close the connection; further events are irrelevant
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections for the reconnector
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a receive-only video peer connection whose handlers report
    /// through `events`
    async fn create(
        &self,
        config: &StreamConfig,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerSession>>;
}
