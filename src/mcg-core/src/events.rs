//! Events delivered from the command worker to consumers.

use crate::error::MpdError;
use crate::models::{Album, AlbumHash};
use crate::protocol::Record;
use std::collections::HashMap;
use std::sync::mpsc;

/// Playback state reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Play,
    Pause,
    Stop,
}

impl PlayerState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "play" => Some(PlayerState::Play),
            "pause" => Some(PlayerState::Pause),
            "stop" => Some(PlayerState::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Play => "play",
            PlayerState::Pause => "pause",
            PlayerState::Stop => "stop",
        }
    }
}

/// Player status with the current song resolved to an album.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: Option<PlayerState>,
    pub album: Option<Album>,
    /// Index of the current song within `album`.
    pub pos: u32,
    /// Elapsed seconds of the current song.
    pub elapsed: u32,
    /// `-1` when the server has no mixer.
    pub volume: i32,
    pub file: Option<String>,
    pub audio: Option<String>,
    pub bitrate: Option<u32>,
    pub error: Option<String>,
}

impl Status {
    /// Scalar fields of a `status` response; album and position are filled in later.
    pub fn from_record(record: &Record) -> Self {
        let elapsed = record
            .get("time")
            .and_then(|time| time.split(':').next())
            .or_else(|| record.get("elapsed"))
            .and_then(|value| value.split('.').next())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        Self {
            state: record.get("state").and_then(PlayerState::parse),
            album: None,
            pos: 0,
            elapsed,
            volume: parse_or_zero(record.get("volume")),
            file: None,
            audio: record.get("audio").map(str::to_string),
            bitrate: record.get("bitrate").and_then(|b| b.parse().ok()),
            error: record.get("error").map(str::to_string),
        }
    }
}

/// Database and daemon statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub artists: u32,
    pub albums: u32,
    pub songs: u32,
    pub db_playtime: u64,
    pub playtime: u64,
    pub uptime: u64,
}

impl Stats {
    pub fn from_record(record: &Record) -> Self {
        Self {
            artists: parse_or_zero(record.get("artists")),
            albums: parse_or_zero(record.get("albums")),
            songs: parse_or_zero(record.get("songs")),
            db_playtime: parse_or_zero(record.get("db_playtime")),
            playtime: parse_or_zero(record.get("playtime")),
            uptime: parse_or_zero(record.get("uptime")),
        }
    }
}

fn parse_or_zero<T: std::str::FromStr + Default>(value: Option<&str>) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or_default()
}

/// Everything the worker reports. Payloads are snapshots owned by the receiver.
#[derive(Debug, Clone)]
pub enum Event {
    Connection(bool),
    Status(Status),
    Stats(Stats),
    Albums(HashMap<AlbumHash, Album>),
    /// Consecutive runs of songs sharing an album, in queue order.
    Playlist(Vec<Album>),
    Error(MpdError),
}

/// Receives events on the worker thread.
///
/// Consumers with their own event loop must marshal events onto it.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: Event);
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&self, event: Event) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::SyncSender<Event> {
    fn emit(&self, event: Event) {
        let _ = self.send(event);
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn emit(&self, event: Event) {
        (self.0)(event)
    }
}
