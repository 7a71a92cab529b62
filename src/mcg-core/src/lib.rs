//! Album-oriented client core for the Music Player Daemon.
//!
//! The [`Client`] owns one TCP session to MPD and drives it from a single
//! worker thread. Public command methods only enqueue work; results come back
//! as [`Event`]s through the [`EventSink`] handed to [`Client::new`].
//!
//! ```rust,ignore
//! use mcg_core::{Client, ConnectParams, Event};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let client = Client::new(tx);
//! client.connect(ConnectParams::new("localhost", 6600));
//! client.load_albums();
//! while let Ok(event) = rx.recv() {
//!     if let Event::Albums(albums) = event {
//!         println!("{} albums", albums.len());
//!         break;
//!     }
//! }
//! ```

pub mod cache;
pub mod client;
pub mod command;
pub mod config;
pub mod cover;
pub mod error;
pub mod events;
pub mod library;
pub mod logging;
pub mod models;
pub mod paths;
pub mod protocol;
pub mod secrets;
pub mod thumbnail;
pub mod transport;

pub use cache::{CacheError, ThumbnailCache};
pub use client::{Client, ConnectParams, ConnectionState};
pub use config::{
    CacheConfig, Config, ConfigError, ConnectionConfig, LogLevel, LoggingConfig, TimeoutConfig,
    ValidationError,
};
pub use cover::{CoverResolver, CoverSource};
pub use error::{AckError, MpdError, MpdResult};
pub use events::{Event, EventSink, FnSink, PlayerState, Stats, Status};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{Album, AlbumHash, PlaylistSlot, SortOrder, Track};
pub use paths::{AppDirs, DirsError};
pub use secrets::{CredentialStore, SecretsError};
pub use thumbnail::{BatchRenderer, ThumbnailLoader};

pub const APP_NAME: &str = "mcg";
pub const APP_AUTHOR: &str = "MCG";
pub const APP_QUALIFIER: &str = "org";
