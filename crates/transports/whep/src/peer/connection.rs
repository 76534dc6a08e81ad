//! webrtc-rs backed peer connections

use super::{PeerEvent, PeerEvents, PeerFactory, PeerSession};
use crate::config::StreamConfig;
use crate::status::IceState;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

/// RTP packet received on the video track
///
/// Packets are not depacketized or decoded here.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// MIME type (e.g. "video/H264")
    pub mime_type: String,
    /// RTP payload
    pub payload: Bytes,
    /// RTP timestamp
    pub timestamp: u32,
    /// RTP sequence number
    pub sequence_number: u16,
}

/// Factory for receive-only webrtc-rs peer connections
#[derive(Default, Clone)]
pub struct WebRtcPeerFactory {
    /// Optional sink for received video packets
    packet_tx: Option<mpsc::Sender<VideoPacket>>,
    /// Total packets received across all connections
    packets_received: Arc<AtomicU64>,
}

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward received video packets to `packet_tx`
    ///
    /// Packets are dropped when the receiver lags behind.
    pub fn with_packet_sink(mut self, packet_tx: mpsc::Sender<VideoPacket>) -> Self {
        self.packet_tx = Some(packet_tx);
        self
    }

    /// Total RTP packets received by connections from this factory
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    #[instrument(skip_all, fields(generation = events.generation()))]
    async fn create(
        &self,
        config: &StreamConfig,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let ice_events = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let events = ice_events.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCIceConnectionState::New => IceState::New,
                        RTCIceConnectionState::Checking => IceState::Connecting,
                        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                            IceState::Connected
                        }
                        RTCIceConnectionState::Disconnected => IceState::Disconnected,
                        RTCIceConnectionState::Failed => IceState::Failed,
                        RTCIceConnectionState::Closed => IceState::Closed,
                        _ => return,
                    };
                    debug!(generation = events.generation(), ?state, "ICE state");
                    events.emit(PeerEvent::IceStateChanged(state));
                })
            },
        ));

        let track_events = events.clone();
        let packet_tx = self.packet_tx.clone();
        let packets_received = Arc::clone(&self.packets_received);
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            let packet_tx = packet_tx.clone();
            let packets_received = Arc::clone(&packets_received);
            Box::pin(async move {
                let mime_type = track.codec().capability.mime_type.clone();
                info!(generation = events.generation(), %mime_type, "Remote track received");
                events.emit(PeerEvent::TrackReceived {
                    mime_type: mime_type.clone(),
                });
                tokio::spawn(drain_track(track, mime_type, packet_tx, packets_received));
            })
        }));

        peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                Error::PeerConnectionError(format!("Failed to add video transceiver: {}", e))
            })?;

        Ok(Arc::new(WebRtcPeer {
            generation: events.generation(),
            peer_connection,
            wait_for_ice_gathering: config.wait_for_ice_gathering,
        }))
    }
}

/// Read RTP packets until the track ends
async fn drain_track(
    track: Arc<TrackRemote>,
    mime_type: String,
    packet_tx: Option<mpsc::Sender<VideoPacket>>,
    packets_received: Arc<AtomicU64>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                packets_received.fetch_add(1, Ordering::Relaxed);
                if let Some(tx) = &packet_tx {
                    let _ = tx.try_send(VideoPacket {
                        mime_type: mime_type.clone(),
                        payload: packet.payload.clone(),
                        timestamp: packet.header.timestamp,
                        sequence_number: packet.header.sequence_number,
                    });
                }
            }
            Err(e) => {
                debug!("Track read ended (normal on close): {}", e);
                break;
            }
        }
    }
}

/// A webrtc-rs peer connection
pub struct WebRtcPeer {
    generation: u64,
    peer_connection: Arc<RTCPeerConnection>,
    wait_for_ice_gathering: bool,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        if self.wait_for_ice_gathering {
            let _ = gathering_complete.recv().await;
        }

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after setting offer".to_string())
        })?;

        debug!(generation = self.generation, bytes = local_desc.sdp.len(), "Created SDP offer");

        Ok(local_desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!(generation = self.generation, "Closing peer connection");
        self.peer_connection.close().await.map_err(|e| {
            warn!(generation = self.generation, "Failed to close peer connection: {}", e);
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}
