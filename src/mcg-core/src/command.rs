//! The subset of MPD commands this client issues.
//!
//! Each variant knows its wire name, its arguments, and how its response is
//! split into entities.

use crate::protocol::{encode_command, parse_records, Record};

/// A request understood by MPD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Password(String),
    Status,
    Stats,
    CurrentSong,
    ListAllInfo,
    PlaylistInfo,
    Update,
    Clear,
    AddId(String),
    DeleteId(u32),
    PlayId(u32),
    Play,
    Pause,
    Stop,
    Seek { pos: u32, time: u32 },
    SetVol(u32),
    Idle,
    NoIdle,
    CommandListBegin,
    CommandListEnd,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Password(_) => "password",
            Command::Status => "status",
            Command::Stats => "stats",
            Command::CurrentSong => "currentsong",
            Command::ListAllInfo => "listallinfo",
            Command::PlaylistInfo => "playlistinfo",
            Command::Update => "update",
            Command::Clear => "clear",
            Command::AddId(_) => "addid",
            Command::DeleteId(_) => "deleteid",
            Command::PlayId(_) => "playid",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Seek { .. } => "seek",
            Command::SetVol(_) => "setvol",
            Command::Idle => "idle",
            Command::NoIdle => "noidle",
            Command::CommandListBegin => "command_list_begin",
            Command::CommandListEnd => "command_list_end",
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            Command::Password(password) => vec![password.clone()],
            Command::AddId(file) => vec![file.clone()],
            Command::DeleteId(id) | Command::PlayId(id) => vec![id.to_string()],
            Command::Seek { pos, time } => vec![pos.to_string(), time.to_string()],
            Command::SetVol(volume) => vec![volume.to_string()],
            _ => Vec::new(),
        }
    }

    /// The request line, newline included.
    pub fn encode(&self) -> String {
        encode_command(self.name(), &self.args())
    }

    /// The request line as it may appear in logs.
    pub fn loggable(&self) -> String {
        match self {
            Command::Password(_) => "password \"***\"".to_string(),
            other => other.encode().trim_end().to_string(),
        }
    }

    /// Keys that start a new entity in this command's response.
    pub fn delimiters(&self) -> &'static [&'static str] {
        match self {
            Command::ListAllInfo => &["file", "directory", "playlist"],
            Command::PlaylistInfo => &["file"],
            _ => &[],
        }
    }

    /// Split a response to this command into entities.
    pub fn parse_records(&self, lines: &[String]) -> Vec<Record> {
        parse_records(lines, self.delimiters())
    }
}

/// Subsystems reported by `idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subsystem {
    Database,
    Update,
    Player,
    Mixer,
    Playlist,
    Other(String),
}

impl Subsystem {
    pub fn parse(name: &str) -> Self {
        match name {
            "database" => Subsystem::Database,
            "update" => Subsystem::Update,
            "player" => Subsystem::Player,
            "mixer" => Subsystem::Mixer,
            "playlist" => Subsystem::Playlist,
            other => Subsystem::Other(other.to_string()),
        }
    }
}

/// Subsystems listed in an `idle` response (`changed: <name>` lines).
pub fn parse_changed(record: &Record) -> Vec<Subsystem> {
    record.get_all("changed").map(Subsystem::parse).collect()
}
