//! Transient user notifications ("toasts")

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How long a toast stays visible
pub const TOAST_DURATION: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastCategory {
    Info,
    Success,
    Error,
}

/// A short message shown to the user for [`TOAST_DURATION`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub message: String,
    pub category: ToastCategory,
}

impl Toast {
    pub fn new(message: impl Into<String>, category: ToastCategory) -> Self {
        Self {
            message: message.into(),
            category,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, ToastCategory::Info)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, ToastCategory::Success)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, ToastCategory::Error)
    }
}

/// Sink for toasts
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Writes toasts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.category {
            ToastCategory::Error => warn!(target: "kaleido::toast", "{}", toast.message),
            _ => info!(target: "kaleido::toast", "{}", toast.message),
        }
    }
}

/// Fans toasts out to any number of subscribers
///
/// Toasts sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<Toast>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, toast: Toast) {
        let _ = self.tx.send(toast);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_delivers() {
        let notifier = ChannelNotifier::default();
        let mut rx = notifier.subscribe();

        notifier.notify(Toast::error("Error: boom"));

        let toast = rx.try_recv().unwrap();
        assert_eq!(toast.message, "Error: boom");
        assert_eq!(toast.category, ToastCategory::Error);
    }

    #[test]
    fn test_channel_notifier_without_subscribers() {
        ChannelNotifier::default().notify(Toast::info("nobody listens"));
    }
}
