//! Aggregation of flat song records into albums.

use crate::models::{Album, AlbumHash, Track};
use crate::protocol::Record;
use std::collections::HashMap;

pub type AlbumMap = HashMap<AlbumHash, Album>;

/// Group database songs by album title.
///
/// Records missing `artist`, `title` or `file` are skipped.
pub fn aggregate_albums(records: &[Record]) -> AlbumMap {
    let mut albums = AlbumMap::new();
    let mut skipped = 0usize;
    for record in records {
        let Some(track) = Track::from_record(record) else {
            skipped += 1;
            continue;
        };
        let title = Album::title_of(record);
        albums
            .entry(AlbumHash::of(title))
            .or_insert_with(|| Album::new(title))
            .add_track(track);
    }
    tracing::debug!(albums = albums.len(), skipped, "aggregated albums");
    albums
}

/// Group queue songs into runs of consecutive songs sharing an album.
///
/// An album that recurs later in the queue starts a new run.
pub fn aggregate_playlist(records: &[Record]) -> Vec<Album> {
    let mut runs: Vec<Album> = Vec::new();
    for record in records {
        let Some(track) = Track::from_playlist_record(record) else {
            tracing::trace!("skipping incomplete playlist entry");
            continue;
        };
        let title = Album::title_of(record);
        let hash = AlbumHash::of(title);
        match runs.last_mut() {
            Some(run) if run.hash() == &hash => run.add_track(track),
            _ => {
                let mut run = Album::new(title);
                run.add_track(track);
                runs.push(run);
            }
        }
    }
    runs
}

/// Resolve the current song to its album and the song's index within it.
///
/// The song is matched against the runs by its queue position, so a recurring
/// album resolves to the right run and skipped queue entries do not shift the
/// lookup. Songs not found in any run fall back to the library album with
/// index 0.
pub fn locate_current(playlist: &[Album], albums: &AlbumMap, song: &Record) -> Option<(Album, u32)> {
    let track = Track::from_playlist_record(song)?;
    let title = Album::title_of(song);
    let hash = AlbumHash::of(title);

    let pos = track.pos()?;
    for run in playlist.iter().filter(|run| run.hash() == &hash) {
        let (Some(first), Some(last)) = (
            run.tracks().first().and_then(Track::pos),
            run.tracks().last().and_then(Track::pos),
        ) else {
            continue;
        };
        if !(first..=last).contains(&pos) {
            continue;
        }
        if let Some(index) = run.tracks().iter().position(|t| t.pos() == Some(pos)) {
            return Some((run.clone(), index as u32));
        }
    }

    let album = albums.get(&hash).cloned().unwrap_or_else(|| {
        let mut album = Album::new(title);
        album.add_track(track);
        album
    });
    Some((album, 0))
}
