//! `config.toml` for the client and its collaborators.

use crate::client::ConnectParams;
use crate::paths::AppDirs;
use crate::transport::Timeouts;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            connection: ConnectionConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Music directory for cover lookup: a local path or a web server path.
    #[serde(default)]
    pub image_dir: String,
    /// Prefer the keyring; this is only read when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            image_dir: String::new(),
            password: None,
        }
    }
}

/// Socket timeouts in seconds. `idle_secs = 0` waits in `idle` forever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_timeouts(&self) -> Timeouts {
        let secs = |value: u64| (value > 0).then(|| Duration::from_secs(value));
        Timeouts {
            connect: secs(self.connect_secs),
            command: secs(self.command_secs),
            idle: secs(self.idle_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Edge length of the square cover thumbnails, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    /// Mirror log lines to stderr.
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("connection.host must not be empty")]
    EmptyHost,
    #[error("connection.port must not be 0")]
    InvalidPort,
    #[error("cache.thumbnail_size must be at least 1")]
    InvalidThumbnailSize,
    #[error("timeouts.idle_secs ({idle}) is shorter than timeouts.command_secs ({command})")]
    IdleShorterThanCommand { idle: u64, command: u64 },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn save(&self, dirs: &AppDirs) -> Result<PathBuf, ConfigError> {
        self.validate().map_err(ConfigError::Validation)?;
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "saved config");
        Ok(path)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.connection.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.connection.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.cache.thumbnail_size == 0 {
            return Err(ValidationError::InvalidThumbnailSize);
        }
        let TimeoutConfig {
            command_secs,
            idle_secs,
            ..
        } = self.timeouts;
        if idle_secs > 0 && command_secs > 0 && idle_secs < command_secs {
            return Err(ValidationError::IdleShorterThanCommand {
                idle: idle_secs,
                command: command_secs,
            });
        }
        Ok(())
    }

    /// Connection parameters; `password` overrides the configured one.
    pub fn connect_params(&self, password: Option<String>) -> ConnectParams {
        ConnectParams::new(&self.connection.host, self.connection.port)
            .with_password(password.or_else(|| self.connection.password.clone()))
            .with_image_dir(&self.connection.image_dir)
            .with_timeouts(self.timeouts.to_timeouts())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    6600
}

fn default_connect_secs() -> u64 {
    5
}

fn default_command_secs() -> u64 {
    15
}

fn default_idle_secs() -> u64 {
    600
}

fn default_thumbnail_size() -> u32 {
    100
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 6600);
        assert_eq!(config.cache.thumbnail_size, 100);
        assert_eq!(config.logging.max_log_files, 7);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = Config::default();
        config.connection.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = Config::default();
        config.connection.host = "  ".into();
        assert_eq!(config.validate(), Err(ValidationError::EmptyHost));

        let mut config = Config::default();
        config.cache.thumbnail_size = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidThumbnailSize));

        let mut config = Config::default();
        config.timeouts.idle_secs = 10;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::IdleShorterThanCommand { idle: 10, command: 15 })
        ));
        config.timeouts.idle_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        fs::write(
            Config::config_path(&dirs),
            "[connection]\nhost = \"mpd.lan\"\n\n[cache]\nthumbnail_size = 64\n",
        )
        .unwrap();

        let config = Config::load_or_default(&dirs).unwrap();
        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);
        assert_eq!(config.connection.host, "mpd.lan");
        assert_eq!(config.connection.port, 6600);
        assert_eq!(config.cache.thumbnail_size, 64);
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn missing_file_gives_defaults_and_save_round_trips() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        let mut config = Config::load_or_default(&dirs).unwrap();
        assert_eq!(config, Config::default());

        config.connection.image_dir = "/srv/music".into();
        config.timeouts.idle_secs = 0;
        let path = config.save(&dirs).unwrap();
        assert!(path.exists());
        assert!(!fs::read_to_string(&path).unwrap().contains("password"));
        assert_eq!(Config::load_or_default(&dirs).unwrap(), config);
    }

    #[test]
    fn unparseable_file_is_reported() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        fs::write(Config::config_path(&dirs), "connection = 3").unwrap();
        assert!(matches!(
            Config::load_or_default(&dirs),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn connect_params_follow_config() {
        let mut config = Config::default();
        config.connection.password = Some("stored".into());
        config.timeouts.idle_secs = 0;

        let params = config.connect_params(None);
        assert_eq!(params.port, 6600);
        assert_eq!(params.password.as_deref(), Some("stored"));
        assert_eq!(params.timeouts.idle, None);
        assert_eq!(params.timeouts.command, Some(Duration::from_secs(15)));

        let params = config.connect_params(Some("flag".into()));
        assert_eq!(params.password.as_deref(), Some("flag"));
    }
}
