//! Self-healing WHEP stream
//!
//! `StreamReconnector` owns at most one peer connection at a time and keeps
//! renegotiating it:
//!
//! ```text
//! idle ──start──▶ connecting ──track──▶ connected
//!                   │   ▲                  │
//!     404 ──────────┤   │ after delay      │ ICE disconnected/failed/closed
//!                   ▼   │                  ▼
//!                offline ◀─────────── reconnecting
//! ```
//!
//! Every connection gets a generation number. Callbacks and negotiation
//! results carry the generation they were started for and are dropped once
//! a newer connection exists, so a closing connection cannot schedule a
//! retry for its replacement.

use crate::config::StreamConfig;
use crate::peer::{
    PeerEvent, PeerEventSink, PeerEvents, PeerFactory, PeerSession, WebRtcPeerFactory,
};
use crate::signaling::{HttpWhepSignaler, WhepSignaler};
use crate::status::StreamStatus;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a retry is being scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Transport or negotiation failure: short delay, shown as reconnecting
    Transient,
    /// Endpoint answered 404: long delay, shown as offline
    Offline,
}

impl RetryKind {
    fn status(self) -> StreamStatus {
        match self {
            RetryKind::Transient => StreamStatus::Reconnecting,
            RetryKind::Offline => StreamStatus::Offline,
        }
    }
}

/// The single live connection and its retry bookkeeping
#[derive(Default)]
struct ConnectionSlot {
    /// Generation of the current connection
    generation: u64,
    /// Current peer connection, if one was created
    peer: Option<Arc<dyn PeerSession>>,
    /// Pending retry timer
    reconnect_timer: Option<JoinHandle<()>>,
    /// Set while a retry is scheduled; cleared when it fires
    is_reconnecting: bool,
    /// Kind of the pending retry
    pending_retry: Option<RetryKind>,
    /// Retries scheduled since media last flowed
    failed_attempts: u32,
    /// Set by `stop()`; blocks new retries until the next `start()`
    stopped: bool,
}

struct Inner {
    config: StreamConfig,
    factory: Arc<dyn PeerFactory>,
    signaler: Arc<dyn WhepSignaler>,
    slot: Mutex<ConnectionSlot>,
    status_tx: watch::Sender<StreamStatus>,
    retries_scheduled: AtomicU64,
}

/// Keeps a WHEP stream alive across transport failures
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct StreamReconnector {
    inner: Arc<Inner>,
}

impl StreamReconnector {
    /// Create a reconnector over the given peer factory and signaler
    pub fn new(
        config: StreamConfig,
        factory: Arc<dyn PeerFactory>,
        signaler: Arc<dyn WhepSignaler>,
    ) -> Result<Self> {
        config.validate()?;

        let (status_tx, _) = watch::channel(StreamStatus::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                factory,
                signaler,
                slot: Mutex::new(ConnectionSlot::default()),
                status_tx,
                retries_scheduled: AtomicU64::new(0),
            }),
        })
    }

    /// Create a reconnector backed by webrtc-rs and reqwest
    pub fn with_webrtc(config: StreamConfig, factory: WebRtcPeerFactory) -> Result<Self> {
        let signaler = HttpWhepSignaler::new(&config)?;
        Self::new(config, Arc::new(factory), Arc::new(signaler))
    }

    /// Configuration in use
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Current status
    pub fn status(&self) -> StreamStatus {
        *self.inner.status_tx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Generation of the current connection
    pub fn generation(&self) -> u64 {
        self.inner.slot.lock().generation
    }

    /// Kind of the retry currently scheduled, if any
    pub fn pending_retry(&self) -> Option<RetryKind> {
        self.inner.slot.lock().pending_retry
    }

    /// Total retries scheduled since creation
    pub fn retries_scheduled(&self) -> u64 {
        self.inner.retries_scheduled.load(Ordering::Relaxed)
    }

    /// Open a fresh connection, replacing the current one
    ///
    /// Never fails: errors are logged and turned into a scheduled retry.
    pub async fn start(&self) {
        let (generation, previous) = {
            let mut slot = self.inner.slot.lock();
            slot.stopped = false;
            slot.generation += 1;
            // A manual start supersedes a pending retry. When the retry timer
            // itself calls start() it has already cleared its handle.
            if let Some(timer) = slot.reconnect_timer.take() {
                timer.abort();
                slot.is_reconnecting = false;
                slot.pending_retry = None;
            }
            (slot.generation, slot.peer.take())
        };

        if let Some(peer) = previous {
            if let Err(e) = peer.close().await {
                debug!(generation, "Previous connection did not close cleanly: {}", e);
            }
        }

        self.update_status(StreamStatus::Connecting);
        info!(generation, url = %self.inner.config.stream_url, "Starting stream");

        match self.connect(generation).await {
            Ok(()) => {
                debug!(generation, "WHEP negotiation complete");
            }
            Err(e) if !self.is_current(generation) => {
                debug!(generation, "Dropping result of superseded attempt: {}", e);
            }
            Err(e) => {
                warn!(generation, "Connection failed: {}", e);
                let kind = if e.is_offline() {
                    RetryKind::Offline
                } else {
                    RetryKind::Transient
                };
                self.attempt_reconnect(kind);
            }
        }
    }

    /// Create the peer, exchange offer and answer
    async fn connect(&self, generation: u64) -> Result<()> {
        let sink: Arc<dyn PeerEventSink> = Arc::new(EventRelay {
            inner: Arc::downgrade(&self.inner),
        });

        let peer = self
            .inner
            .factory
            .create(&self.inner.config, PeerEvents::new(generation, sink))
            .await?;

        let installed = {
            let mut slot = self.inner.slot.lock();
            if slot.generation == generation {
                slot.peer = Some(Arc::clone(&peer));
                true
            } else {
                false
            }
        };
        if !installed {
            let _ = peer.close().await;
            return Err(Error::Stopped);
        }

        let offer = peer.create_offer().await?;
        let answer = self
            .inner
            .signaler
            .negotiate(&self.inner.config.stream_url, offer)
            .await?;

        if !self.is_current(generation) {
            return Err(Error::Stopped);
        }

        peer.set_remote_answer(answer).await
    }

    /// Schedule a single retry
    ///
    /// Returns `false` without side effects when a retry is already
    /// scheduled or the reconnector is stopped. When `max_attempts` is
    /// exhausted the status becomes offline and no retry is scheduled.
    pub fn attempt_reconnect(&self, kind: RetryKind) -> bool {
        let delay = self.delay_for(kind);

        {
            let mut slot = self.inner.slot.lock();
            if slot.stopped {
                return false;
            }
            if slot.is_reconnecting {
                debug!(?kind, "Reconnect already scheduled");
                return false;
            }

            slot.failed_attempts += 1;
            if let Some(max) = self.inner.config.max_attempts {
                if slot.failed_attempts > max {
                    warn!(attempts = slot.failed_attempts - 1, "Giving up on stream");
                    drop(slot);
                    self.update_status(StreamStatus::Offline);
                    return false;
                }
            }

            slot.is_reconnecting = true;
            slot.pending_retry = Some(kind);

            if let Some(timer) = slot.reconnect_timer.take() {
                timer.abort();
            }

            let this = self.clone();
            slot.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut slot = this.inner.slot.lock();
                    slot.is_reconnecting = false;
                    slot.pending_retry = None;
                    slot.reconnect_timer = None;
                }
                info!("Attempting to reconnect...");
                this.start().await;
            }));
        }

        self.inner.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        info!(?kind, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.update_status(kind.status());
        true
    }

    /// Publish a status
    pub fn update_status(&self, status: StreamStatus) {
        let previous = self.inner.status_tx.send_replace(status);
        if previous != status {
            info!(from = %previous, to = %status, "Stream status changed");
        }
    }

    /// React to an event from a peer connection
    ///
    /// Events from any generation but the current one are ignored.
    pub fn handle_peer_event(&self, generation: u64, event: PeerEvent) {
        if !self.is_current(generation) {
            debug!(generation, ?event, "Ignoring event from stale connection");
            return;
        }

        match event {
            PeerEvent::TrackReceived { mime_type } => {
                debug!(generation, %mime_type, "Media flowing");
                self.inner.slot.lock().failed_attempts = 0;
                self.update_status(StreamStatus::Connected);
            }
            PeerEvent::IceStateChanged(state) if state.is_terminal() => {
                info!(generation, ?state, "ICE connection lost");
                self.attempt_reconnect(RetryKind::Transient);
            }
            PeerEvent::IceStateChanged(state) => {
                debug!(generation, ?state, "ICE state");
            }
        }
    }

    /// Close the connection and cancel any pending retry
    pub async fn stop(&self) {
        let peer = {
            let mut slot = self.inner.slot.lock();
            slot.stopped = true;
            slot.generation += 1;
            slot.is_reconnecting = false;
            slot.pending_retry = None;
            if let Some(timer) = slot.reconnect_timer.take() {
                timer.abort();
            }
            slot.peer.take()
        };

        if let Some(peer) = peer {
            let _ = peer.close().await;
        }

        self.update_status(StreamStatus::Idle);
        info!("Stream stopped");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.slot.lock().generation == generation
    }

    fn delay_for(&self, kind: RetryKind) -> Duration {
        match kind {
            RetryKind::Transient => self.inner.config.retry_delay(),
            RetryKind::Offline => self.inner.config.offline_retry_delay(),
        }
    }
}

/// Routes peer callbacks back to the reconnector without keeping it alive
struct EventRelay {
    inner: Weak<Inner>,
}

impl PeerEventSink for EventRelay {
    fn on_peer_event(&self, generation: u64, event: PeerEvent) {
        if let Some(inner) = self.inner.upgrade() {
            StreamReconnector { inner }.handle_peer_event(generation, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::IceState;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockPeer {
        closed: std::sync::atomic::AtomicBool,
        answer: Mutex<Option<String>>,
    }

    #[async_trait]
    impl PeerSession for MockPeer {
        async fn create_offer(&self) -> Result<String> {
            Ok("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n".to_string())
        }

        async fn set_remote_answer(&self, sdp: String) -> Result<()> {
            *self.answer.lock() = Some(sdp);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockFactory {
        created: AtomicUsize,
        events: Mutex<Vec<PeerEvents>>,
        peers: Mutex<Vec<Arc<MockPeer>>>,
    }

    impl MockFactory {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn emit(&self, index: usize, event: PeerEvent) {
            let events = self.events.lock()[index].clone();
            events.emit(event);
        }
    }

    #[async_trait]
    impl PeerFactory for MockFactory {
        async fn create(
            &self,
            _config: &StreamConfig,
            events: PeerEvents,
        ) -> Result<Arc<dyn PeerSession>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.events.lock().push(events);
            let peer = Arc::new(MockPeer::default());
            self.peers.lock().push(Arc::clone(&peer));
            Ok(peer)
        }
    }

    enum Reply {
        Answer,
        NotFound,
        ServerError,
    }

    #[derive(Default)]
    struct MockSignaler {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl MockSignaler {
        fn with_replies(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WhepSignaler for MockSignaler {
        async fn negotiate(&self, _url: &str, _offer_sdp: String) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().pop_front().unwrap_or(Reply::Answer) {
                Reply::Answer => Ok("v=0\r\nanswer\r\n".to_string()),
                Reply::NotFound => Err(Error::StreamOffline("404".to_string())),
                Reply::ServerError => Err(Error::SignalingError("Server returned 500".to_string())),
            }
        }
    }

    fn reconnector(
        config: StreamConfig,
        replies: Vec<Reply>,
    ) -> (StreamReconnector, Arc<MockFactory>, Arc<MockSignaler>) {
        let factory = Arc::new(MockFactory::default());
        let signaler = Arc::new(MockSignaler::with_replies(replies));
        let reconnector = StreamReconnector::new(
            config,
            Arc::clone(&factory) as Arc<dyn PeerFactory>,
            Arc::clone(&signaler) as Arc<dyn WhepSignaler>,
        )
        .unwrap();
        (reconnector, factory, signaler)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_start_then_track_is_connected() {
        let (reconnector, factory, _) = reconnector(StreamConfig::default(), vec![]);

        reconnector.start().await;
        assert_eq!(reconnector.status(), StreamStatus::Connecting);
        assert_eq!(factory.created(), 1);
        assert_eq!(
            factory.peers.lock()[0].answer.lock().as_deref(),
            Some("v=0\r\nanswer\r\n")
        );

        factory.emit(
            0,
            PeerEvent::TrackReceived {
                mime_type: "video/H264".to_string(),
            },
        );
        assert_eq!(reconnector.status(), StreamStatus::Connected);
        assert_eq!(reconnector.pending_retry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_goes_offline_with_long_delay() {
        let (reconnector, factory, _) = reconnector(StreamConfig::default(), vec![Reply::NotFound]);

        reconnector.start().await;
        assert_eq!(reconnector.status(), StreamStatus::Offline);
        assert_eq!(reconnector.pending_retry(), Some(RetryKind::Offline));

        advance_ms(14_999).await;
        assert_eq!(factory.created(), 1);

        advance_ms(1).await;
        assert_eq!(factory.created(), 2);
        assert_eq!(reconnector.status(), StreamStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retries_after_short_delay() {
        let (reconnector, factory, _) =
            reconnector(StreamConfig::default(), vec![Reply::ServerError]);

        reconnector.start().await;
        assert_eq!(reconnector.status(), StreamStatus::Reconnecting);
        assert_eq!(reconnector.pending_retry(), Some(RetryKind::Transient));

        advance_ms(1_999).await;
        assert_eq!(factory.created(), 1);

        advance_ms(1).await;
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_ice_failures_schedule_one_retry() {
        let (reconnector, factory, _) = reconnector(StreamConfig::default(), vec![]);
        reconnector.start().await;

        factory.emit(0, PeerEvent::IceStateChanged(IceState::Disconnected));
        factory.emit(0, PeerEvent::IceStateChanged(IceState::Failed));
        factory.emit(0, PeerEvent::IceStateChanged(IceState::Closed));

        assert_eq!(reconnector.retries_scheduled(), 1);
        assert_eq!(reconnector.status(), StreamStatus::Reconnecting);

        advance_ms(2_000).await;
        assert_eq!(factory.created(), 2);
        assert_eq!(reconnector.retries_scheduled(), 1);
        assert_eq!(reconnector.pending_retry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_events_are_ignored() {
        let (reconnector, factory, _) = reconnector(StreamConfig::default(), vec![]);
        reconnector.start().await;
        reconnector.start().await;
        assert_eq!(factory.created(), 2);
        assert!(factory.peers.lock()[0].closed.load(Ordering::SeqCst));

        factory.emit(0, PeerEvent::IceStateChanged(IceState::Closed));
        assert_eq!(reconnector.retries_scheduled(), 0);

        factory.emit(
            0,
            PeerEvent::TrackReceived {
                mime_type: "video/VP8".to_string(),
            },
        );
        assert_eq!(reconnector.status(), StreamStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let (reconnector, factory, _) =
            reconnector(StreamConfig::default(), vec![Reply::ServerError]);
        reconnector.start().await;
        assert!(reconnector.pending_retry().is_some());

        reconnector.stop().await;
        assert_eq!(reconnector.status(), StreamStatus::Idle);
        assert!(!reconnector.attempt_reconnect(RetryKind::Transient));

        advance_ms(5_000).await;
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_reconnect_is_reentrant_safe() {
        let (reconnector, factory, _) = reconnector(StreamConfig::default(), vec![]);
        reconnector.start().await;

        assert!(reconnector.attempt_reconnect(RetryKind::Transient));
        assert!(!reconnector.attempt_reconnect(RetryKind::Transient));
        assert!(!reconnector.attempt_reconnect(RetryKind::Offline));
        assert_eq!(reconnector.pending_retry(), Some(RetryKind::Transient));

        advance_ms(2_000).await;
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_gives_up_offline() {
        let config = StreamConfig::default().with_max_attempts(2);
        let (reconnector, factory, signaler) = reconnector(
            config,
            vec![Reply::ServerError, Reply::ServerError, Reply::ServerError],
        );

        reconnector.start().await;
        advance_ms(2_000).await;
        advance_ms(2_000).await;

        assert_eq!(signaler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reconnector.status(), StreamStatus::Offline);
        assert_eq!(reconnector.pending_retry(), None);

        advance_ms(20_000).await;
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_subscription_sees_transitions() {
        let (reconnector, _factory, _) = reconnector(StreamConfig::default(), vec![Reply::NotFound]);
        let mut rx = reconnector.subscribe();
        assert_eq!(*rx.borrow_and_update(), StreamStatus::Idle);

        reconnector.start().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), StreamStatus::Offline);
    }
}
