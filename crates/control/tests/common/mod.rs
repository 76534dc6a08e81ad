//! Shared test fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use kaleido_control::{
    ChannelNotifier, ControlChange, ControlChannel, ControlSynchronizer, RateLimit, Result,
    Rotation,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Control channel that records every change with its send time
pub struct RecordingChannel {
    started: Instant,
    sent: Mutex<Vec<(ControlChange, u64)>>,
    /// Delay before a non-zero value is accepted, like a slow request
    latency: Duration,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            sent: Mutex::new(Vec::new()),
            latency,
        })
    }

    pub fn sent(&self) -> Vec<ControlChange> {
        self.sent.lock().iter().map(|(c, _)| *c).collect()
    }

    /// `(value, milliseconds since creation)` for every send
    pub fn sent_at(&self) -> Vec<(i32, u64)> {
        self.sent.lock().iter().map(|(c, t)| (c.value, *t)).collect()
    }
}

#[async_trait]
impl ControlChannel for RecordingChannel {
    async fn send(&self, change: ControlChange) -> Result<()> {
        if change.value != 0 && !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.sent.lock().push((change, elapsed));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn synchronizer(
    rate_limit: RateLimit,
) -> (ControlSynchronizer, Arc<RecordingChannel>, ChannelNotifier) {
    synchronizer_over(RecordingChannel::new(), rate_limit)
}

pub fn synchronizer_over(
    channel: Arc<RecordingChannel>,
    rate_limit: RateLimit,
) -> (ControlSynchronizer, Arc<RecordingChannel>, ChannelNotifier) {
    let notifier = ChannelNotifier::default();
    let sync = ControlSynchronizer::new(
        Arc::clone(&channel) as Arc<dyn ControlChannel>,
        Arc::new(notifier.clone()),
        rate_limit,
        Rotation::default(),
    );
    (sync, channel, notifier)
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}
