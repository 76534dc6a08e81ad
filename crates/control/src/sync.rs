//! Control State Synchronizer
//!
//! Slider drags produce a value per input event. The synchronizer shows
//! every value immediately in [`PanelState`] but only sends a rate-limited
//! subset to the server:
//!
//! - **Debounce**: each change replaces the pending send for its key and
//!   restarts the quiet period. Only the last value of a burst is sent.
//! - **Throttle**: the first change on an idle key is sent at once and
//!   opens a window. Changes inside the window are coalesced; when it ends,
//!   the latest value (if any) is sent and a new window opens.
//!
//! Every key has its own timer slot, so brightness and frequency never
//! cancel each other.

use crate::channel::ControlChannel;
use crate::key::{ControlChange, ControlKey};
use crate::notify::{Notifier, Toast};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How changes are coalesced before sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    /// Send the last value once input has been quiet for the period
    Debounce(Duration),
    /// Send the first value at once, then at most one value per window
    Throttle(Duration),
}

impl RateLimit {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);
    pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(150);

    pub fn debounce() -> Self {
        RateLimit::Debounce(Self::DEFAULT_DEBOUNCE)
    }

    pub fn throttle() -> Self {
        RateLimit::Throttle(Self::DEFAULT_THROTTLE)
    }

    pub fn period(&self) -> Duration {
        match self {
            RateLimit::Debounce(d) | RateLimit::Throttle(d) => *d,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::debounce()
    }
}

/// Direction of a timed rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl RotateDirection {
    pub fn sign(self) -> i32 {
        match self {
            RotateDirection::Clockwise => 1,
            RotateDirection::CounterClockwise => -1,
        }
    }
}

/// Speed and duration of a timed rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    /// Motor frequency while rotating, in Hz
    pub speed: i32,
    pub duration: Duration,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            speed: 1000,
            duration: Duration::from_millis(1000),
        }
    }
}

/// What the control surface shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelState {
    pub brightness: i32,
    pub frequency: i32,
    /// Inputs and buttons accept interaction (control connection up, no
    /// rotation running)
    pub ui_enabled: bool,
    /// The live stream allows its dependent controls; stays `true` when no
    /// stream is wired to the panel
    pub stream_ready: bool,
    /// Clients connected to the server, as last pushed
    pub clients: u32,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            brightness: 15,
            frequency: 0,
            ui_enabled: false,
            stream_ready: true,
            clients: 0,
        }
    }
}

impl PanelState {
    pub fn value(&self, key: ControlKey) -> i32 {
        match key {
            ControlKey::Brightness => self.brightness,
            ControlKey::Frequency => self.frequency,
        }
    }

    /// Whether sliders and rotate buttons may act
    pub fn accepts_input(&self) -> bool {
        self.ui_enabled && self.stream_ready
    }

    /// Slider label for `key`
    pub fn label(&self, key: ControlKey) -> String {
        key.label(self.value(key))
    }

    fn set(&mut self, key: ControlKey, value: i32) -> bool {
        let slot = match key {
            ControlKey::Brightness => &mut self.brightness,
            ControlKey::Frequency => &mut self.frequency,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

/// Timer state for one control key
#[derive(Default)]
struct KeySlot {
    /// Bumped whenever the pending timer is superseded
    seq: u64,
    /// Debounce timer or throttle window
    timer: Option<JoinHandle<()>>,
    /// Throttle window is open
    window_open: bool,
    /// Latest value seen inside the open window
    trailing: Option<i32>,
}

#[derive(Default)]
struct RotateSlot {
    seq: u64,
    reset: Option<JoinHandle<()>>,
}

struct Inner {
    channel: Arc<dyn ControlChannel>,
    notifier: Arc<dyn Notifier>,
    rate_limit: RateLimit,
    rotation: Rotation,
    state_tx: watch::Sender<PanelState>,
    slots: Mutex<HashMap<ControlKey, KeySlot>>,
    rotate: Mutex<RotateSlot>,
    /// Held for the whole of a channel send so changes arrive in order
    send_gate: AsyncMutex<()>,
}

/// Coalesces control changes into rate-limited sends
///
/// Cheap to clone; all clones share the same state and timers.
#[derive(Clone)]
pub struct ControlSynchronizer {
    inner: Arc<Inner>,
}

impl ControlSynchronizer {
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        notifier: Arc<dyn Notifier>,
        rate_limit: RateLimit,
        rotation: Rotation,
    ) -> Self {
        let (state_tx, _) = watch::channel(PanelState::default());

        Self {
            inner: Arc::new(Inner {
                channel,
                notifier,
                rate_limit,
                rotation,
                state_tx,
                slots: Mutex::new(HashMap::new()),
                rotate: Mutex::new(RotateSlot::default()),
                send_gate: AsyncMutex::new(()),
            }),
        }
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.inner.rate_limit
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// Snapshot of what the panel shows
    pub fn state(&self) -> PanelState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelState> {
        self.inner.state_tx.subscribe()
    }

    /// Show `value` at once and queue a rate-limited send
    pub fn change_control_value(&self, key: ControlKey, value: i32) {
        self.show_value(key, value);

        let change = ControlChange::new(key, value);
        match self.inner.rate_limit {
            RateLimit::Debounce(quiet) => self.debounce(change, quiet),
            RateLimit::Throttle(window) => self.throttle(change, window),
        }
    }

    /// Show and send `value` now, dropping anything pending for `key`
    pub async fn send_immediately(&self, key: ControlKey, value: i32) {
        self.cancel_pending(key);
        self.show_value(key, value);
        self.send_control_state(ControlChange::new(key, value)).await;
    }

    /// Performance variant of [`send_immediately`](Self::send_immediately)
    ///
    /// Waits for earlier sends to finish, then gives up with
    /// [`Error::Stopped`] if `token` was cancelled meanwhile. A stop queued
    /// behind an in-flight note is therefore always the last value sent.
    pub async fn send_unless_cancelled(
        &self,
        key: ControlKey,
        value: i32,
        token: &CancellationToken,
    ) -> Result<()> {
        let _gate = self.inner.send_gate.lock().await;
        if token.is_cancelled() {
            return Err(Error::Stopped);
        }
        self.cancel_pending(key);
        self.show_value(key, value);
        self.send_gated(ControlChange::new(key, value)).await;
        Ok(())
    }

    /// Send one change; failures become an error toast, nothing is retried
    pub async fn send_control_state(&self, change: ControlChange) {
        let _gate = self.inner.send_gate.lock().await;
        self.send_gated(change).await;
    }

    async fn send_gated(&self, change: ControlChange) {
        debug!(channel = self.inner.channel.name(), %change, "Sending control change");

        if let Err(e) = self.inner.channel.send(change).await {
            if e.is_retryable() {
                warn!(%change, "Control server unreachable: {}", e);
            } else {
                info!(%change, "Control change rejected: {}", e);
            }
            self.inner
                .notifier
                .notify(Toast::error(send_failure_message(&change, &e)));
        }
    }

    /// Spin the motor at the configured speed, then stop it
    ///
    /// The UI is disabled for the duration. Calling again while a rotation
    /// is running replaces it: the stop fires one duration after the last
    /// call.
    pub fn rotate(&self, direction: RotateDirection) {
        self.set_ui_enabled(false);
        self.change_control_value(
            ControlKey::Frequency,
            direction.sign() * self.inner.rotation.speed,
        );

        let mut rotate = self.inner.rotate.lock();
        rotate.seq += 1;
        let seq = rotate.seq;
        if let Some(reset) = rotate.reset.take() {
            debug!(?direction, "Replacing pending rotation stop");
            reset.abort();
        }

        let this = self.clone();
        let duration = self.inner.rotation.duration;
        rotate.reset = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            {
                let mut rotate = this.inner.rotate.lock();
                if rotate.seq != seq {
                    return;
                }
                rotate.reset = None;
            }
            this.change_control_value(ControlKey::Frequency, 0);
            this.set_ui_enabled(true);
        }));
    }

    /// Apply a value pushed by the server; nothing is sent
    pub fn apply_remote(&self, key: ControlKey, value: i32) {
        self.show_value(key, value);
    }

    pub fn set_ui_enabled(&self, enabled: bool) {
        self.inner.state_tx.send_if_modified(|state| {
            let changed = state.ui_enabled != enabled;
            state.ui_enabled = enabled;
            changed
        });
    }

    /// Follow the stream's controls-enabled flag
    pub fn set_stream_ready(&self, ready: bool) {
        self.inner.state_tx.send_if_modified(|state| {
            let changed = state.stream_ready != ready;
            state.stream_ready = ready;
            changed
        });
    }

    pub fn set_client_count(&self, clients: u32) {
        self.inner.state_tx.send_if_modified(|state| {
            let changed = state.clients != clients;
            state.clients = clients;
            changed
        });
    }

    /// Whether a send or window is pending for `key`
    pub fn is_pending(&self, key: ControlKey) -> bool {
        self.inner
            .slots
            .lock()
            .get(&key)
            .map(|slot| slot.timer.is_some())
            .unwrap_or(false)
    }

    /// Abort all timers; pending values are dropped
    pub fn shutdown(&self) {
        for key in ControlKey::ALL {
            self.cancel_pending(key);
        }
        let mut rotate = self.inner.rotate.lock();
        rotate.seq += 1;
        if let Some(reset) = rotate.reset.take() {
            reset.abort();
        }
    }

    fn show_value(&self, key: ControlKey, value: i32) {
        self.inner
            .state_tx
            .send_if_modified(|state| state.set(key, value));
    }

    fn cancel_pending(&self, key: ControlKey) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            slot.seq += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.window_open = false;
            slot.trailing = None;
        }
    }

    fn debounce(&self, change: ControlChange, quiet: Duration) {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(change.key).or_default();
        slot.seq += 1;
        let seq = slot.seq;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let this = self.clone();
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            {
                let mut slots = this.inner.slots.lock();
                match slots.get_mut(&change.key) {
                    Some(slot) if slot.seq == seq => slot.timer = None,
                    _ => return,
                }
            }
            this.send_control_state(change).await;
        }));
    }

    fn throttle(&self, change: ControlChange, window: Duration) {
        let key = change.key;
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(key).or_default();

        if slot.window_open {
            debug!(%change, "Coalescing into open window");
            slot.trailing = Some(change.value);
            return;
        }

        slot.window_open = true;
        slot.trailing = None;
        slot.seq += 1;
        let seq = slot.seq;

        // Leading edge
        let this = self.clone();
        tokio::spawn(async move { this.send_control_state(change).await });

        let this = self.clone();
        slot.timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(window).await;

                let trailing = {
                    let mut slots = this.inner.slots.lock();
                    let slot = match slots.get_mut(&key) {
                        Some(slot) if slot.seq == seq => slot,
                        _ => return,
                    };
                    let trailing = slot.trailing.take();
                    if trailing.is_none() {
                        slot.window_open = false;
                        slot.timer = None;
                    }
                    trailing
                };

                match trailing {
                    Some(value) => {
                        // Trailing edge; the window stays open
                        let sender = this.clone();
                        tokio::spawn(async move {
                            sender
                                .send_control_state(ControlChange::new(key, value))
                                .await
                        });
                    }
                    None => return,
                }
            }
        }));
    }
}

/// Toast text for a failed send
pub fn send_failure_message(change: &ControlChange, error: &Error) -> String {
    match error {
        Error::Forbidden => format!("You don't have permission to set {}.", change),
        Error::Invalid { message } => format!("{} is invalid: {}", change, message),
        Error::Server(_) => format!("ServerError: Unable to set {}.", change),
        Error::Network(_) => "NetworkError: Unable to reach the server.".to_string(),
        Error::Disconnected => format!("Not connected: unable to set {}.", change),
        _ => format!("Failed to set {}.", change),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, ToastCategory};
    use crate::Result;
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Records every change with the time it reached the channel
    struct RecordingChannel {
        started: Instant,
        sent: Mutex<Vec<(ControlChange, u64)>>,
        fail_with: Mutex<Option<fn() -> Error>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Instant::now(),
                sent: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
            })
        }

        fn sent(&self) -> Vec<ControlChange> {
            self.sent.lock().iter().map(|(c, _)| *c).collect()
        }

        fn sent_at(&self) -> Vec<(i32, u64)> {
            self.sent.lock().iter().map(|(c, t)| (c.value, *t)).collect()
        }
    }

    #[async_trait]
    impl ControlChannel for RecordingChannel {
        async fn send(&self, change: ControlChange) -> Result<()> {
            let elapsed = self.started.elapsed().as_millis() as u64;
            self.sent.lock().push((change, elapsed));
            match *self.fail_with.lock() {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn forbidden() -> Error {
        Error::Forbidden
    }

    fn synchronizer(
        rate_limit: RateLimit,
    ) -> (ControlSynchronizer, Arc<RecordingChannel>, ChannelNotifier) {
        let channel = RecordingChannel::new();
        let notifier = ChannelNotifier::default();
        let sync = ControlSynchronizer::new(
            Arc::clone(&channel) as Arc<dyn ControlChannel>,
            Arc::new(notifier.clone()),
            rate_limit,
            Rotation::default(),
        );
        (sync, channel, notifier)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_sends_last_value_once() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());

        for value in [100, 200, 300, 400, 500] {
            sync.change_control_value(ControlKey::Frequency, value);
            advance_ms(40).await;
        }
        assert!(channel.sent().is_empty());
        assert!(sync.is_pending(ControlKey::Frequency));

        advance_ms(250).await;
        assert_eq!(channel.sent(), vec![ControlChange::frequency(500)]);
        assert!(!sync.is_pending(ControlKey::Frequency));

        advance_ms(1000).await;
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_is_per_key() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());

        sync.change_control_value(ControlKey::Brightness, 30);
        sync.change_control_value(ControlKey::Frequency, 700);
        advance_ms(250).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&ControlChange::brightness(30)));
        assert!(sent.contains(&ControlChange::frequency(700)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_labels_update_before_send() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());

        sync.change_control_value(ControlKey::Brightness, 42);

        assert_eq!(sync.state().label(ControlKey::Brightness), "42 %");
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_and_trailing() {
        let (sync, channel, _) = synchronizer(RateLimit::throttle());

        sync.change_control_value(ControlKey::Frequency, 10);
        settle().await;
        advance_ms(50).await;
        sync.change_control_value(ControlKey::Frequency, 20);
        advance_ms(50).await;
        sync.change_control_value(ControlKey::Frequency, 30);

        // Leading edge went out at once
        assert_eq!(channel.sent_at(), vec![(10, 0)]);

        advance_ms(50).await;
        assert_eq!(channel.sent_at(), vec![(10, 0), (30, 150)]);

        // Window reopened by the trailing send closes without new input
        advance_ms(150).await;
        assert!(!sync.is_pending(ControlKey::Frequency));

        sync.change_control_value(ControlKey::Frequency, 40);
        settle().await;
        assert_eq!(channel.sent().last(), Some(&ControlChange::frequency(40)));
        assert_eq!(channel.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_single_change_has_no_trailing_send() {
        let (sync, channel, _) = synchronizer(RateLimit::throttle());

        sync.change_control_value(ControlKey::Brightness, 5);
        advance_ms(500).await;

        assert_eq!(channel.sent(), vec![ControlChange::brightness(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_last_call_wins() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());
        sync.set_ui_enabled(true);

        sync.rotate(RotateDirection::Clockwise);
        sync.rotate(RotateDirection::CounterClockwise);
        assert!(!sync.state().ui_enabled);
        assert_eq!(sync.state().frequency, -1000);

        advance_ms(999).await;
        assert!(!sync.state().ui_enabled);

        advance_ms(1).await;
        assert!(sync.state().ui_enabled);
        assert_eq!(sync.state().frequency, 0);

        advance_ms(250).await;
        assert_eq!(
            channel.sent(),
            vec![ControlChange::frequency(-1000), ControlChange::frequency(0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_becomes_error_toast() {
        let (sync, channel, notifier) = synchronizer(RateLimit::debounce());
        let mut toasts = notifier.subscribe();
        *channel.fail_with.lock() = Some(forbidden as fn() -> Error);

        sync.change_control_value(ControlKey::Brightness, 50);
        advance_ms(250).await;

        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.category, ToastCategory::Error);
        assert_eq!(toast.message, "You don't have permission to set brightness=50.");
        // No retry
        advance_ms(5000).await;
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_values_are_not_sent() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());

        sync.apply_remote(ControlKey::Frequency, 800);
        sync.set_client_count(3);
        advance_ms(1000).await;

        assert_eq!(sync.state().frequency, 800);
        assert_eq!(sync.state().clients, 3);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_immediately_drops_pending() {
        let (sync, channel, _) = synchronizer(RateLimit::debounce());

        sync.change_control_value(ControlKey::Frequency, 1500);
        sync.send_immediately(ControlKey::Frequency, 0).await;
        advance_ms(1000).await;

        assert_eq!(channel.sent(), vec![ControlChange::frequency(0)]);
    }

    #[test]
    fn test_send_failure_messages() {
        let change = ControlChange::frequency(2500);
        assert_eq!(
            send_failure_message(
                &change,
                &Error::Invalid {
                    message: "Frequency must be between -2000 and 2000".to_string()
                }
            ),
            "frequency=2500 is invalid: Frequency must be between -2000 and 2000"
        );
        assert_eq!(
            send_failure_message(&change, &Error::Server(500)),
            "ServerError: Unable to set frequency=2500."
        );
        assert_eq!(
            send_failure_message(&change, &Error::Network("refused".to_string())),
            "NetworkError: Unable to reach the server."
        );
        assert_eq!(
            send_failure_message(&change, &Error::Rejected(418)),
            "Failed to set frequency=2500."
        );
    }
}
