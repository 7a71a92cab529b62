//! Per-host disk cache of album thumbnails.
//!
//! Every file in a host directory is encoded at the size recorded in the
//! directory's `size` marker. Opening the cache with a different size clears
//! the directory.

use crate::models::Album;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Name of the marker file holding the thumbnail size in effect.
pub const SIZE_FILENAME: &str = "size";

static CACHE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read cache directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write size marker {path}: {source}")]
    WriteMarker {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Thumbnail cache for one MPD host.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    dir: PathBuf,
    size: u32,
}

impl ThumbnailCache {
    /// Open `<root>/<host>`, invalidating it if it holds another size.
    pub fn open(root: &Path, host: &str, size: u32) -> CacheResult<Self> {
        let dir = root.join(host);
        fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        let cache = Self { dir, size };
        cache.sync_size()?;
        Ok(cache)
    }

    fn sync_size(&self) -> CacheResult<()> {
        // Several album loads may open the same host cache at once.
        let _guard = CACHE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let marker = self.dir.join(SIZE_FILENAME);
        let stored = fs::read_to_string(&marker)
            .ok()
            .and_then(|contents| contents.trim().parse::<u32>().ok());
        if stored == Some(self.size) {
            return Ok(());
        }

        tracing::info!(
            dir = %self.dir.display(),
            old = ?stored,
            new = self.size,
            "thumbnail size changed, clearing cache"
        );
        self.clear()?;
        fs::write(&marker, self.size.to_string())
            .map_err(|source| CacheError::WriteMarker { path: marker, source })
    }

    /// Remove every cached file. Failures on single files are logged and skipped.
    pub fn clear(&self) -> CacheResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| CacheError::ReadDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut removed = Vec::new();
        for path in entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
        {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cache file")
                }
            }
        }
        Ok(removed)
    }

    /// Cache path for an album's thumbnail.
    pub fn create_filename(&self, album: &Album) -> PathBuf {
        self.dir.join(album.hash().as_str())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
