//! Songs played on the motor
//!
//! A song is the JSON form of a parsed MIDI file (the structure written by
//! tonejs/midi's `toJSON()`): tracks of notes with start `time` and
//! `duration` in seconds. Only the fields below are read.

use crate::notes::REST;
use crate::perform::{outcome_of, PerformanceOutcome, Performer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Longest note start or duration a song may use
pub const MAX_SONG_SECONDS: f64 = 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongNote {
    /// Start, in seconds from the beginning of the song
    pub time: f64,
    /// Length in seconds
    pub duration: f64,
    /// Scientific pitch name, e.g. "C#4"
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: Vec<SongNote>,
}

impl Track {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Unnamed Track"
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Song {
    /// Parse a song, rejecting note timings that cannot be scheduled
    pub fn from_json(json: &str) -> Result<Self> {
        let song: Self = serde_json::from_str(json)?;
        song.validate()?;
        Ok(song)
    }

    /// Every note starts and lasts between 0 and [`MAX_SONG_SECONDS`]
    pub fn validate(&self) -> Result<()> {
        for (t, track) in self.tracks.iter().enumerate() {
            for (n, note) in track.notes.iter().enumerate() {
                for (field, value) in [("time", note.time), ("duration", note.duration)] {
                    seconds(value).map_err(|_| {
                        Error::InvalidSong(format!(
                            "track {} note {}: {} {} is out of range",
                            t + 1,
                            n + 1,
                            field,
                            value
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Load a `.json` song file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            return Err(Error::UnsupportedSong(path.display().to_string()));
        }

        let json = tokio::fs::read_to_string(path).await?;
        let song = Self::from_json(&json)?;
        info!(name = %song.name, tracks = song.tracks.len(), "Song loaded");
        Ok(song)
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        self.tracks.get(index).ok_or(Error::UnknownTrack(index + 1))
    }
}

/// Plays song tracks through the shared [`Performer`]
#[derive(Clone)]
pub struct SongPlayer {
    performer: Performer,
}

impl SongPlayer {
    pub fn new(performer: Performer) -> Self {
        Self { performer }
    }

    /// Play track `index` (0-based) of `song` to the end or until stopped
    ///
    /// Notes are scheduled against the song start, so time spent sending
    /// does not accumulate. The motor is set to 0 Hz when the track ends.
    pub async fn play_track(&self, song: &Song, index: usize) -> Result<PerformanceOutcome> {
        let track = song.track(index)?;
        let Some(performance) = self.performer.begin() else {
            return Ok(PerformanceOutcome::AlreadyRunning);
        };

        info!(track = track.display_name(), notes = track.notes.len(), "Playing track");

        let started = Instant::now();
        let result = async {
            for note in &track.notes {
                let start_at = started.checked_add(seconds(note.time)?).ok_or_else(|| {
                    Error::InvalidSong(format!("note time {} overflows", note.time))
                })?;
                let now = Instant::now();
                if start_at > now {
                    performance.play_note(REST, start_at - now).await?;
                }
                performance
                    .play_note(&note.name, seconds(note.duration)?)
                    .await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        // A stop already silenced the motor
        if !matches!(result, Err(Error::Stopped)) {
            performance.finish().await;
        }
        outcome_of(result)
    }
}

fn seconds(value: f64) -> Result<Duration> {
    if !(0.0..=MAX_SONG_SECONDS).contains(&value) {
        return Err(Error::InvalidSong(format!("{} s is out of range", value)));
    }
    Duration::try_from_secs_f64(value).map_err(|e| Error::InvalidSong(e.to_string()))
}
