//! UI events and their dispatch
//!
//! Everything the user or the server can do to the panel is a [`UiEvent`].
//! [`ControlPanel::dispatch`] applies one to the synchronizer, performer and
//! notifier. The kiosk binary feeds it console lines via
//! [`UiEvent::parse`] and channel pushes via `From<ChannelEvent>`.

use crate::channel::ChannelEvent;
use crate::key::ControlKey;
use crate::notify::{Notifier, Toast};
use crate::perform::{PerformanceOutcome, Performer};
use crate::script::Script;
use crate::song::{Song, SongPlayer};
use crate::sync::{ControlSynchronizer, RotateDirection};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A slider moved
    SliderMoved { key: ControlKey, value: i32 },
    /// A rotate button was pressed
    Rotate(RotateDirection),
    /// Run script source
    RunScript(String),
    /// Run the script stored in a file
    RunScriptFile(PathBuf),
    /// Stop the running script or track
    Stop,
    /// Load a song file
    LoadSong(PathBuf),
    /// Play track (0-based) of the loaded song
    PlayTrack(usize),
    /// Log the panel state
    ShowState,
    /// Control socket connected
    SocketConnected,
    /// Control socket lost
    SocketDisconnected,
    /// Server pushed the current value of a control
    RemoteValue { key: ControlKey, value: i32 },
    /// Server pushed the client count
    ClientCount(u32),
    /// Server reported a failed change
    ServerError { message: Option<String> },
}

impl UiEvent {
    /// Parse a console line
    ///
    /// ```text
    /// brightness 30 | frequency -500     move a slider
    /// cw | ccw                            rotate
    /// script frequency 500; wait 1000     run inline script (';' separates lines)
    /// run show.kscript                    run script file
    /// load song.json | play 2             load song, play track 2
    /// stop | state
    /// ```
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let event = match command.to_ascii_lowercase().as_str() {
            "brightness" | "frequency" | "light" | "motor" => {
                let key: ControlKey = command.parse()?;
                let value: i32 = rest
                    .parse()
                    .map_err(|_| Error::InvalidCommand(format!("{} needs a number", key)))?;
                UiEvent::SliderMoved {
                    key,
                    value: key.check(value)?,
                }
            }
            "cw" | "clockwise" => UiEvent::Rotate(RotateDirection::Clockwise),
            "ccw" | "counterclockwise" => UiEvent::Rotate(RotateDirection::CounterClockwise),
            "script" if !rest.is_empty() => UiEvent::RunScript(rest.replace(';', "\n")),
            "run" if !rest.is_empty() => UiEvent::RunScriptFile(PathBuf::from(rest)),
            "load" if !rest.is_empty() => UiEvent::LoadSong(PathBuf::from(rest)),
            "play" => {
                let track: usize = rest
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| Error::InvalidCommand("play needs a track number".into()))?;
                UiEvent::PlayTrack(track - 1)
            }
            "stop" => UiEvent::Stop,
            "state" | "status" => UiEvent::ShowState,
            _ => return Err(Error::InvalidCommand(line.to_string())),
        };

        Ok(event)
    }
}

impl From<ChannelEvent> for UiEvent {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Connected => UiEvent::SocketConnected,
            ChannelEvent::Disconnected => UiEvent::SocketDisconnected,
            ChannelEvent::CurrentValue { key, value } => UiEvent::RemoteValue { key, value },
            ChannelEvent::ClientCount(n) => UiEvent::ClientCount(n),
            ChannelEvent::ServerError { message, .. } => UiEvent::ServerError { message },
        }
    }
}

/// The panel: synchronizer, performer, notifier and the loaded song
#[derive(Clone)]
pub struct ControlPanel {
    sync: ControlSynchronizer,
    performer: Performer,
    notifier: Arc<dyn Notifier>,
    song: Arc<Mutex<Option<Arc<Song>>>>,
}

impl ControlPanel {
    pub fn new(sync: ControlSynchronizer) -> Self {
        let notifier = Arc::clone(sync.notifier());
        Self {
            performer: Performer::new(sync.clone()),
            sync,
            notifier,
            song: Arc::new(Mutex::new(None)),
        }
    }

    pub fn synchronizer(&self) -> &ControlSynchronizer {
        &self.sync
    }

    pub fn performer(&self) -> &Performer {
        &self.performer
    }

    pub fn song(&self) -> Option<Arc<Song>> {
        self.song.lock().clone()
    }

    /// Apply one event
    ///
    /// Slider and rotate input is dropped while the panel does not accept
    /// input (see [`PanelState::accepts_input`](crate::PanelState::accepts_input)).
    /// Scripts and tracks run in the background; their task is returned so
    /// callers can await the end of the performance.
    pub async fn dispatch(&self, event: UiEvent) -> Option<JoinHandle<()>> {
        debug!(?event, "Dispatching UI event");

        match event {
            UiEvent::SliderMoved { .. } | UiEvent::Rotate(_)
                if !self.sync.state().accepts_input() =>
            {
                debug!(?event, "Controls disabled, ignoring input");
            }
            UiEvent::SliderMoved { key, value } => {
                self.sync.change_control_value(key, value);
            }
            UiEvent::Rotate(direction) => self.sync.rotate(direction),
            UiEvent::RunScript(source) => return self.spawn_script(source),
            UiEvent::RunScriptFile(path) => match tokio::fs::read_to_string(&path).await {
                Ok(source) => return self.spawn_script(source),
                Err(e) => self.toast_error(format!("Script Error: {}: {}", path.display(), e)),
            },
            UiEvent::Stop => {
                self.performer.stop().await;
            }
            UiEvent::LoadSong(path) => self.load_song(path).await,
            UiEvent::PlayTrack(index) => return self.spawn_track(index),
            UiEvent::ShowState => {
                let state = self.sync.state();
                info!(
                    brightness = %state.label(ControlKey::Brightness),
                    frequency = %state.label(ControlKey::Frequency),
                    ui_enabled = state.ui_enabled,
                    stream_ready = state.stream_ready,
                    clients = state.clients,
                    running = self.performer.is_running(),
                    "Panel state"
                );
            }
            UiEvent::SocketConnected => self.sync.set_ui_enabled(true),
            UiEvent::SocketDisconnected => self.sync.set_ui_enabled(false),
            UiEvent::RemoteValue { key, value } => self.sync.apply_remote(key, value),
            UiEvent::ClientCount(n) => self.sync.set_client_count(n),
            UiEvent::ServerError { message } => {
                if let Some(message) = message {
                    self.toast_error(format!("Error: {}", message));
                }
            }
        }

        None
    }

    fn spawn_script(&self, source: String) -> Option<JoinHandle<()>> {
        let script = match Script::parse(&source) {
            Ok(script) => script,
            Err(e) => {
                self.toast_error(format!("Script Error: {}", e));
                return None;
            }
        };

        let this = self.clone();
        Some(tokio::spawn(async move {
            match script.run(&this.performer).await {
                Ok(outcome) => this.report(outcome),
                Err(e) => this.toast_error(format!("Script Error: {}", e)),
            }
        }))
    }

    async fn load_song(&self, path: PathBuf) {
        // Loading a new song invalidates the one playing
        if self.performer.is_running() {
            self.performer.stop().await;
        }

        match Song::load(&path).await {
            Ok(song) => {
                let tracks: Vec<String> = song
                    .tracks
                    .iter()
                    .enumerate()
                    .map(|(i, t)| format!("{}: {}", i + 1, t.display_name()))
                    .collect();
                info!(tracks = %tracks.join(", "), "Song ready");
                self.notifier.notify(Toast::success(format!(
                    "Loaded {} ({} tracks)",
                    path.display(),
                    song.tracks.len()
                )));
                *self.song.lock() = Some(Arc::new(song));
            }
            Err(e) => self.toast_error(format!("Error parsing MIDI: {}", e)),
        }
    }

    fn spawn_track(&self, index: usize) -> Option<JoinHandle<()>> {
        let Some(song) = self.song() else {
            self.toast_error("No song loaded".to_string());
            return None;
        };

        let player = SongPlayer::new(self.performer.clone());
        let this = self.clone();
        Some(tokio::spawn(async move {
            match player.play_track(&song, index).await {
                Ok(outcome) => this.report(outcome),
                Err(e) => this.toast_error(format!("Error playing track: {}", e)),
            }
        }))
    }

    fn report(&self, outcome: PerformanceOutcome) {
        match outcome {
            PerformanceOutcome::Completed => info!("Performance completed"),
            PerformanceOutcome::Stopped => debug!("Performance stopped"),
            PerformanceOutcome::AlreadyRunning => {
                self.notifier
                    .notify(Toast::info("Something is already playing"));
            }
        }
    }

    fn toast_error(&self, message: String) {
        self.notifier.notify(Toast::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sliders() {
        assert_eq!(
            UiEvent::parse("brightness 30").unwrap(),
            UiEvent::SliderMoved {
                key: ControlKey::Brightness,
                value: 30
            }
        );
        assert_eq!(
            UiEvent::parse("  motor -500 ").unwrap(),
            UiEvent::SliderMoved {
                key: ControlKey::Frequency,
                value: -500
            }
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = UiEvent::parse("brightness 80").unwrap_err();
        assert_eq!(err.to_string(), "brightness must be between 0 and 50");
        assert!(UiEvent::parse("frequency fast").is_err());
    }

    #[test]
    fn test_parse_buttons() {
        assert_eq!(
            UiEvent::parse("cw").unwrap(),
            UiEvent::Rotate(RotateDirection::Clockwise)
        );
        assert_eq!(
            UiEvent::parse("CCW").unwrap(),
            UiEvent::Rotate(RotateDirection::CounterClockwise)
        );
        assert_eq!(UiEvent::parse("stop").unwrap(), UiEvent::Stop);
        assert_eq!(UiEvent::parse("state").unwrap(), UiEvent::ShowState);
    }

    #[test]
    fn test_parse_inline_script() {
        assert_eq!(
            UiEvent::parse("script frequency 500; wait 1000").unwrap(),
            UiEvent::RunScript("frequency 500\n wait 1000".to_string())
        );
    }

    #[test]
    fn test_parse_tracks_are_one_based() {
        assert_eq!(UiEvent::parse("play 2").unwrap(), UiEvent::PlayTrack(1));
        assert!(UiEvent::parse("play 0").is_err());
        assert!(UiEvent::parse("play").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        assert!(matches!(
            UiEvent::parse("dance"),
            Err(Error::InvalidCommand(_))
        ));
        assert!(UiEvent::parse("run").is_err());
    }

    #[test]
    fn test_channel_events_map_to_ui_events() {
        assert_eq!(UiEvent::from(ChannelEvent::Connected), UiEvent::SocketConnected);
        assert_eq!(
            UiEvent::from(ChannelEvent::ServerError {
                error: "HARDWARE_FAILURE".to_string(),
                message: Some("Unable to reach kaleido hardware".to_string()),
            }),
            UiEvent::ServerError {
                message: Some("Unable to reach kaleido hardware".to_string())
            }
        );
    }
}
