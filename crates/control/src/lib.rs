//! Control client for the Kaleido rig
//!
//! Drives the motor frequency and light brightness of the rig from a
//! control surface:
//!
//! - **Synchronizer**: every slider move is shown at once, but sends to the
//!   server are debounced or throttled per control
//! - **Channels**: WebSocket with server pushes, or the REST state endpoint
//! - **Performances**: songs (JSON-encoded MIDI) and user scripts, one at a
//!   time, cancellable mid-note
//! - **UI events**: a single enum for everything the user or server can do,
//!   dispatched onto a [`ControlPanel`]
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  ControlPanel ◀── UiEvent ◀── console / ChannelEvent      │
//! │  ├─ ControlSynchronizer                                   │
//! │  │   ├─ PanelState (watch)                                │
//! │  │   ├─ per-key debounce / throttle timers                │
//! │  │   └─ ControlChannel ──▶ SocketChannel | RestChannel    │
//! │  ├─ Performer (one performance, CancellationToken)        │
//! │  │   ├─ Script                                            │
//! │  │   └─ SongPlayer                                        │
//! │  └─ Notifier ──▶ Toast                                    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use kaleido_control::{note_frequency, Script, UiEvent, ControlKey};
//!
//! assert_eq!(note_frequency("A4"), Some(440));
//!
//! let script = Script::parse("frequency 800\nwait 500\nfrequency 0").unwrap();
//! assert_eq!(script.commands().len(), 3);
//!
//! let event = UiEvent::parse("brightness 30").unwrap();
//! assert_eq!(event, UiEvent::SliderMoved { key: ControlKey::Brightness, value: 30 });
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod key;
pub mod notes;
pub mod notify;
pub mod perform;
pub mod script;
pub mod song;
pub mod sync;

// Re-exports for public API
pub use channel::{ChannelEvent, ControlChannel, EventFrame, RemoteState, RestChannel, SocketChannel};
pub use commands::{ControlPanel, UiEvent};
pub use config::{ChannelKind, ControlConfig, RateLimitMode};
pub use error::{Error, Result};
pub use key::{ControlChange, ControlKey};
pub use notes::note_frequency;
pub use notify::{ChannelNotifier, Notifier, Toast, ToastCategory, TracingNotifier, TOAST_DURATION};
pub use perform::{Performance, PerformanceOutcome, Performer};
pub use script::{Script, ScriptCommand, ScriptError};
pub use song::{Song, SongNote, SongPlayer, Track};
pub use sync::{ControlSynchronizer, PanelState, RateLimit, RotateDirection, Rotation};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
