use crate::cover::CoverSource;
use crate::protocol::Record;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Label used for songs without an `album` tag.
pub const DEFAULT_ALBUM: &str = "Various";

/// Content hash of an album title: lowercase hex MD5 of its UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlbumHash(String);

impl AlbumHash {
    pub fn of(title: &str) -> Self {
        Self(format!("{:x}", md5::compute(title.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AlbumHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlbumHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side identity of a song in the play queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistSlot {
    pub id: u32,
    pub pos: u32,
}

/// One song. Equality is by file path only.
///
/// Tracks built from `playlistinfo` carry a [`PlaylistSlot`].
#[derive(Debug, Clone)]
pub struct Track {
    artists: Vec<String>,
    album_artists: Vec<String>,
    title: String,
    track_number: Option<u32>,
    length: u32,
    date: Option<String>,
    file: String,
    slot: Option<PlaylistSlot>,
}

impl Track {
    pub fn new(artists: Vec<String>, title: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            artists,
            album_artists: Vec::new(),
            title: title.into(),
            track_number: None,
            length: 0,
            date: None,
            file: file.into(),
            slot: None,
        }
    }

    /// Build a track from a song record.
    ///
    /// Returns `None` when `artist`, `title` or `file` is absent.
    pub fn from_record(record: &Record) -> Option<Self> {
        let artists: Vec<String> = record.get_all("artist").map(str::to_string).collect();
        if artists.is_empty() {
            return None;
        }
        let title = record.get("title")?;
        let file = record.get("file")?;

        let mut track = Track::new(artists, title, file);
        track.album_artists = record.get_all("albumartist").map(str::to_string).collect();
        track.track_number = record.get("track").map(parse_track_number);
        track.length = record
            .get("time")
            .or_else(|| record.get("duration"))
            .map(parse_length)
            .unwrap_or(0);
        track.date = record.get("date").map(str::to_string);
        Some(track)
    }

    /// Like [`Track::from_record`], additionally requiring the queue `id` and `pos`.
    pub fn from_playlist_record(record: &Record) -> Option<Self> {
        let mut track = Self::from_record(record)?;
        let id = record.get("id")?.parse().ok()?;
        let pos = record.get("pos")?.parse().ok()?;
        track.slot = Some(PlaylistSlot { id, pos });
        Some(track)
    }

    pub fn with_track_number(mut self, number: u32) -> Self {
        self.track_number = Some(number);
        self
    }

    pub fn with_length(mut self, seconds: u32) -> Self {
        self.length = seconds;
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_album_artists(mut self, artists: Vec<String>) -> Self {
        self.album_artists = artists;
        self
    }

    /// Featured artists: album-artists are excluded when any are set.
    pub fn artists(&self) -> Vec<&str> {
        exclude(&self.artists, &self.album_artists)
    }

    /// Album-artists, falling back to the track artists.
    pub fn album_artists(&self) -> &[String] {
        if self.album_artists.is_empty() {
            &self.artists
        } else {
            &self.album_artists
        }
    }

    pub fn all_artists(&self) -> &[String] {
        &self.artists
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn track_number(&self) -> Option<u32> {
        self.track_number
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn slot(&self) -> Option<PlaylistSlot> {
        self.slot
    }

    /// Queue id, for tracks listed from the playlist.
    pub fn id(&self) -> Option<u32> {
        self.slot.map(|slot| slot.id)
    }

    /// Queue position, for tracks listed from the playlist.
    pub fn pos(&self) -> Option<u32> {
        self.slot.map(|slot| slot.pos)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
    }
}

impl Eq for Track {}

// "3/12" -> 3, garbage -> 0
fn parse_track_number(value: &str) -> u32 {
    let number = value.split('/').next().unwrap_or_default();
    number.trim().parse().unwrap_or(0)
}

fn parse_length(value: &str) -> u32 {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| seconds as u32)
        .unwrap_or(0)
}

fn exclude<'a>(values: &'a [String], excluded: &[String]) -> Vec<&'a str> {
    values
        .iter()
        .filter(|value| !excluded.contains(value))
        .map(String::as_str)
        .collect()
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

/// Sort criteria for album grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Artist,
    #[default]
    Title,
    Year,
}

/// Songs grouped under one album title. Equality is by [`AlbumHash`].
///
/// Clones share the memoized cover lookup.
#[derive(Debug, Clone)]
pub struct Album {
    hash: AlbumHash,
    title: String,
    artists: Vec<String>,
    album_artists: Vec<String>,
    dates: Vec<String>,
    paths: Vec<String>,
    tracks: Vec<Track>,
    length: u32,
    cover: Arc<OnceLock<Option<CoverSource>>>,
}

impl Album {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            hash: AlbumHash::of(&title),
            title,
            artists: Vec::new(),
            album_artists: Vec::new(),
            dates: Vec::new(),
            paths: Vec::new(),
            tracks: Vec::new(),
            length: 0,
            cover: Arc::new(OnceLock::new()),
        }
    }

    /// Album a song record belongs to, by its `album` tag.
    pub fn title_of(record: &Record) -> &str {
        record.get("album").unwrap_or(DEFAULT_ALBUM)
    }

    pub fn add_track(&mut self, track: Track) {
        self.length = self.length.saturating_add(track.length());
        for artist in track.all_artists() {
            push_unique(&mut self.artists, artist);
        }
        for artist in &track.album_artists {
            push_unique(&mut self.album_artists, artist);
        }
        if let Some(date) = track.date() {
            push_unique(&mut self.dates, date);
        }
        let dir = Path::new(track.file())
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .unwrap_or_default();
        push_unique(&mut self.paths, &dir);
        self.tracks.push(track);
    }

    pub fn hash(&self) -> &AlbumHash {
        &self.hash
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Featured artists: album-artists are excluded when any are set.
    pub fn artists(&self) -> Vec<&str> {
        exclude(&self.artists, &self.album_artists)
    }

    pub fn album_artists(&self) -> &[String] {
        if self.album_artists.is_empty() {
            &self.artists
        } else {
            &self.album_artists
        }
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn date(&self) -> Option<&str> {
        self.dates.first().map(String::as_str)
    }

    /// Directories (relative to the music root) holding this album's files.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Total length in seconds.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Memoized cover, searching with `search` on first use only.
    pub fn cover_or_search(
        &self,
        search: impl FnOnce(&Album) -> Option<CoverSource>,
    ) -> Option<CoverSource> {
        self.cover.get_or_init(|| search(self)).clone()
    }

    pub fn cover_searched(&self) -> bool {
        self.cover.get().is_some()
    }

    /// Whether every whitespace-separated keyword occurs in the album's
    /// artists, title or dates, or in one of its track titles or files.
    pub fn matches(&self, filter: &str) -> bool {
        filter.split_whitespace().all(|keyword| {
            let keyword = keyword.to_lowercase();
            let hit = |value: &str| value.to_lowercase().contains(&keyword);
            self.artists.iter().any(|a| hit(a))
                || hit(&self.title)
                || self.dates.iter().any(|d| hit(d))
                || self
                    .tracks
                    .iter()
                    .any(|t| hit(t.title()) || hit(t.file()))
        })
    }

    /// Compare two albums; absent values sort first.
    pub fn compare(a: &Album, b: &Album, order: SortOrder) -> Ordering {
        match order {
            SortOrder::Artist => a.artists().cmp(&b.artists()),
            SortOrder::Title => a.title.cmp(&b.title),
            SortOrder::Year => a.date().cmp(&b.date()),
        }
    }
}

impl PartialEq for Album {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Album {}
