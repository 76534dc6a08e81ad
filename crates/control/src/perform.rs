//! One performance at a time
//!
//! Scripts and songs both drive the motor over time. They share a single
//! [`Performer`]: starting a second performance while one runs is refused,
//! and [`Performer::stop`] cancels whichever is running. Cancellation is a
//! [`CancellationToken`] observed by every wait, so a stop takes effect at
//! once rather than at the end of the current note.

use crate::key::ControlKey;
use crate::notes::note_frequency;
use crate::sync::ControlSynchronizer;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a performance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceOutcome {
    /// Ran to the end
    Completed,
    /// Cancelled by [`Performer::stop`]
    Stopped,
    /// Another performance was already running; nothing was started
    AlreadyRunning,
}

struct Running {
    id: u64,
    token: CancellationToken,
}

struct PerformerInner {
    sync: ControlSynchronizer,
    running: Mutex<Option<Running>>,
    next_id: Mutex<u64>,
}

/// Owns the "something is playing" flag
#[derive(Clone)]
pub struct Performer {
    inner: Arc<PerformerInner>,
}

impl Performer {
    pub fn new(sync: ControlSynchronizer) -> Self {
        Self {
            inner: Arc::new(PerformerInner {
                sync,
                running: Mutex::new(None),
                next_id: Mutex::new(0),
            }),
        }
    }

    pub fn synchronizer(&self) -> &ControlSynchronizer {
        &self.inner.sync
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Claim the performer
    ///
    /// Returns `None` if a performance is already running. The claim is
    /// released when the returned [`Performance`] is dropped.
    pub fn begin(&self) -> Option<Performance> {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return None;
        }

        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        *running = Some(Running {
            id,
            token: token.clone(),
        });
        debug!(id, "Performance started");

        Some(Performance {
            id,
            token,
            performer: self.clone(),
        })
    }

    /// Cancel the running performance and silence the motor
    ///
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let running = self.inner.running.lock().take();
        let stopped = match running {
            Some(running) => {
                info!(id = running.id, "Stopping performance");
                running.token.cancel();
                true
            }
            None => false,
        };

        self.inner
            .sync
            .send_immediately(ControlKey::Frequency, 0)
            .await;
        stopped
    }

    fn release(&self, id: u64) {
        let mut running = self.inner.running.lock();
        if running.as_ref().map(|r| r.id) == Some(id) {
            *running = None;
            debug!(id, "Performance finished");
        }
    }
}

/// A claimed performance; the handle scripts and songs act through
pub struct Performance {
    id: u64,
    token: CancellationToken,
    performer: Performer,
}

impl Performance {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `duration`, or fail with [`Error::Stopped`] on stop
    pub async fn wait(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Stopped),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Queue a rate-limited change, like moving the slider
    pub fn change(&self, key: ControlKey, value: i32) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Stopped);
        }
        self.performer.inner.sync.change_control_value(key, value);
        Ok(())
    }

    /// Sound `name` for `duration`; a rest sets the frequency to 0
    pub async fn play_note(&self, name: &str, duration: Duration) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Stopped);
        }
        let hz = note_frequency(name).ok_or_else(|| Error::UnknownNote(name.to_string()))?;

        debug!(note = name, hz, ms = duration.as_millis() as u64, "Note");
        self.performer
            .inner
            .sync
            .send_unless_cancelled(ControlKey::Frequency, hz as i32, &self.token)
            .await?;
        self.wait(duration).await
    }

    /// Silence the motor at the end of a performance
    pub async fn finish(&self) {
        self.performer
            .inner
            .sync
            .send_immediately(ControlKey::Frequency, 0)
            .await;
    }
}

impl Drop for Performance {
    fn drop(&mut self) {
        self.performer.release(self.id);
    }
}

/// Fold a performance result into an outcome
///
/// The stop sentinel is not an error.
pub fn outcome_of(result: Result<()>) -> Result<PerformanceOutcome> {
    match result {
        Ok(()) => Ok(PerformanceOutcome::Completed),
        Err(Error::Stopped) => Ok(PerformanceOutcome::Stopped),
        Err(e) => Err(e),
    }
}
