//! Cover artwork lookup for albums.
//!
//! Candidates are tried per album directory, in this order of basenames:
//! `cover`, `folder`, the album title, then `<album artist> - <title>`;
//! each with the extensions `jpg`, `png`, `jpeg`. Local hosts are searched on
//! disk below the image directory, remote hosts over HTTP.

use crate::models::Album;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILE_NAMES: &[&str] = &["cover", "folder"];
const FILE_EXTS: &[&str] = &["jpg", "png", "jpeg"];
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];
const MAX_COVER_BYTES: u64 = 32 * 1024 * 1024;

/// Where an album's cover can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverSource {
    Path(PathBuf),
    Url(String),
}

/// Finds covers for albums served by one MPD host.
#[derive(Clone)]
pub struct CoverResolver {
    host: String,
    image_dir: String,
    http: ureq::Agent,
}

impl CoverResolver {
    pub fn new(host: impl Into<String>, image_dir: impl Into<String>) -> Self {
        let http = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .build();
        Self {
            host: host.into(),
            image_dir: image_dir.into(),
            http,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_local(&self) -> bool {
        LOCAL_HOSTS.contains(&self.host.as_str())
    }

    /// The album's cover, searched at most once per album.
    pub fn resolve(&self, album: &Album) -> Option<CoverSource> {
        album.cover_or_search(|album| self.search(album))
    }

    /// Raw bytes of a resolved cover.
    pub fn read(&self, source: &CoverSource) -> Option<Vec<u8>> {
        match source {
            CoverSource::Path(path) => fs::read(path)
                .map_err(|err| tracing::debug!(path = %path.display(), error = %err, "cover read failed"))
                .ok(),
            CoverSource::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .call()
                    .map_err(|err| tracing::debug!(%url, error = %err, "cover download failed"))
                    .ok()?;
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .take(MAX_COVER_BYTES)
                    .read_to_end(&mut bytes)
                    .map_err(|err| tracing::debug!(%url, error = %err, "cover download failed"))
                    .ok()?;
                Some(bytes)
            }
        }
    }

    fn search(&self, album: &Album) -> Option<CoverSource> {
        let names = candidate_names(album);
        let found = if self.is_local() {
            self.search_local(album, &names).map(CoverSource::Path)
        } else {
            self.search_remote(album, &names).map(CoverSource::Url)
        };
        match &found {
            Some(source) => tracing::debug!(album = %album.title(), ?source, "cover found"),
            None => tracing::debug!(album = %album.title(), "no cover"),
        }
        found
    }

    fn search_local(&self, album: &Album, names: &[String]) -> Option<PathBuf> {
        let root = Path::new(&self.image_dir);
        for dir in album.paths() {
            for name in names {
                for ext in FILE_EXTS {
                    let candidate = root.join(dir).join(format!("{name}.{ext}"));
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }
        album
            .paths()
            .iter()
            .find_map(|dir| any_image_in(&root.join(dir)))
    }

    fn search_remote(&self, album: &Album, names: &[String]) -> Option<String> {
        for dir in album.paths() {
            for name in names {
                for ext in FILE_EXTS {
                    let url = cover_url(&self.host, &self.image_dir, dir, &format!("{name}.{ext}"));
                    match self.http.get(&url).call() {
                        Ok(_) => return Some(url),
                        Err(err) => tracing::trace!(%url, error = %err, "cover request failed"),
                    }
                }
            }
        }
        None
    }
}

fn candidate_names(album: &Album) -> Vec<String> {
    let mut names: Vec<String> = FILE_NAMES.iter().map(|name| name.to_string()).collect();
    names.push(album.title().to_string());
    if let Some(artist) = album.album_artists().first() {
        names.push(format!("{} - {}", artist, album.title()));
    }
    names
}

// First file (by name) with an allowed extension, trying extensions in order.
fn any_image_in(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    FILE_EXTS.iter().find_map(|ext| {
        files
            .iter()
            .find(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
            .cloned()
    })
}

/// `http://<host>/<image_dir>/<dir>/<file>` with each path segment percent-encoded.
pub fn cover_url(host: &str, image_dir: &str, dir: &str, file: &str) -> String {
    let mut url = format!("http://{host}");
    let segments = image_dir
        .split('/')
        .chain(dir.split('/'))
        .chain(std::iter::once(file))
        .filter(|segment| !segment.is_empty());
    for segment in segments {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}
