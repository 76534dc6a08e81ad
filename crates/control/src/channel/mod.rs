//! Transports that carry control changes to the server
//!
//! Two channels exist: the persistent WebSocket ([`SocketChannel`]), which
//! also receives the server's pushes, and the stateless REST endpoint
//! ([`RestChannel`]). Both map server rejections onto [`Error`](crate::Error)
//! so the synchronizer can turn them into toasts.

pub mod rest;
pub mod socket;

pub use rest::{RemoteState, RestChannel};
pub use socket::{EventFrame, SocketChannel};

use crate::key::{ControlChange, ControlKey};
use crate::Result;
use async_trait::async_trait;

/// Carries a single control change to the server
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Send `change`; resolves once the channel accepted it
    async fn send(&self, change: ControlChange) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Something the server told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Socket (re)connected
    Connected,
    /// Socket lost
    Disconnected,
    /// Current value of a control, after any client changed it
    CurrentValue { key: ControlKey, value: i32 },
    /// Number of clients connected to the server
    ClientCount(u32),
    /// The server could not apply a change
    ServerError {
        error: String,
        message: Option<String>,
    },
}
