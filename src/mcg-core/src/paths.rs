//! Per-user directories, resolved through `directories`.

use crate::{APP_AUTHOR, APP_NAME, APP_QUALIFIER};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    config_dir: PathBuf,
    cache_dir: PathBuf,
    log_dir: PathBuf,
}

impl AppDirs {
    /// Platform directories for `mcg`. Logs live in the state directory
    /// where the platform has one, next to local data otherwise.
    pub fn discover() -> Result<Self, DirsError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_AUTHOR, APP_NAME)
            .ok_or(DirsError::MissingProjectDirs)?;
        let log_root = dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir());
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            cache_dir: dirs.cache_dir().to_path_buf(),
            log_dir: log_root.join("logs"),
        })
    }

    /// Everything below one root, for tests and portable setups.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            log_dir: root.join("logs"),
        }
    }

    /// Create the config, cache and log directories.
    ///
    /// Per-host thumbnail directories are created by the cache itself.
    pub fn ensure_exists(&self) -> Result<(), DirsError> {
        for dir in [&self.config_dir, &self.cache_dir, &self.log_dir] {
            fs::create_dir_all(dir).map_err(|source| DirsError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Root of the per-host thumbnail caches.
    pub fn thumbnail_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("covers")
    }
}

#[derive(Debug, Error)]
pub enum DirsError {
    #[error("no home directory to derive the mcg directories from")]
    MissingProjectDirs,
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_dirs_are_distinct() {
        let dirs = AppDirs::discover().expect("should build dirs");
        assert!(dirs.log_dir().ends_with("logs"));
        assert_ne!(dirs.config_dir(), dirs.cache_dir());
        assert!(dirs.thumbnail_cache_dir().starts_with(dirs.cache_dir()));
    }

    #[test]
    fn under_creates_everything_below_root() {
        let root = tempfile::tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        assert!(dirs.config_dir().is_dir());
        assert!(dirs.log_dir().is_dir());
        assert!(!dirs.thumbnail_cache_dir().exists());
        assert_eq!(dirs.thumbnail_cache_dir(), root.path().join("cache").join("covers"));
    }
}
