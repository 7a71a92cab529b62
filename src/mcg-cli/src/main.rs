use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mcg_core::library::AlbumMap;
use mcg_core::{
    init_logging, Album, AppDirs, BatchRenderer, Client, Config, ConnectParams, CoverResolver,
    CredentialStore, Event, PlayerState, SortOrder, Stats, Status, ThumbnailCache,
    ThumbnailLoader,
};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use thiserror::Error;

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "mcg", version, about = "Album-oriented MPD client")]
struct Cli {
    /// MPD host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,
    /// MPD port (overrides config)
    #[arg(long, global = true)]
    port: Option<u16>,
    /// MPD password (overrides config and keyring)
    #[arg(long, global = true)]
    password: Option<String>,
    /// Music directory used to find cover art
    #[arg(long, global = true)]
    image_dir: Option<String>,
    /// Write host/port/image-dir overrides back to config.toml
    #[arg(long, global = true)]
    save: bool,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show player status and the current album
    Status,
    /// Show database statistics
    Stats,
    /// List library albums
    Albums(AlbumQuery),
    /// List the queue grouped by album
    Playlist,
    /// Append matching albums to the queue, starting playback if stopped
    Play(AlbumQuery),
    /// Jump to the first queued album matching the filter
    Jump { filter: Vec<String> },
    /// Remove queued albums matching the filter
    Remove { filter: Vec<String> },
    /// Toggle between play and pause
    Toggle,
    Stop,
    /// Set the volume (0-100)
    Volume {
        #[arg(value_parser = clap::value_parser!(u32).range(0..=100))]
        value: u32,
    },
    /// Seek within the song at a queue position
    Seek { pos: u32, seconds: u32 },
    /// Clear the queue
    Clear,
    /// Rescan the music directory
    Update,
    /// Print events as the server reports changes
    Watch,
    /// Fill the thumbnail cache for matching albums
    Thumbnails(AlbumQuery),
    /// Manage the password stored in the OS keyring
    #[command(subcommand)]
    Password(PasswordCommand),
}

#[derive(Debug, Subcommand)]
enum PasswordCommand {
    /// Store a password for the configured host and port
    Set { password: String },
    /// Forget the stored password
    Clear,
}

#[derive(Debug, Parser, Clone, Default)]
struct AlbumQuery {
    /// Keywords matched against artists, title, dates and tracks
    filter: Vec<String>,
    #[arg(long, value_enum, default_value_t = SortArg::Title)]
    sort: SortArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum SortArg {
    Artist,
    #[default]
    Title,
    Year,
}

impl From<SortArg> for SortOrder {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Artist => SortOrder::Artist,
            SortArg::Title => SortOrder::Title,
            SortArg::Year => SortOrder::Year,
        }
    }
}

#[derive(Debug, Error)]
enum SessionError {
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection to MPD closed")]
    Closed,
    #[error(transparent)]
    Mpd(#[from] mcg_core::MpdError),
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(image_dir) = &self.image_dir {
            config.connection.image_dir = image_dir.clone();
        }
    }
}

/// A connected client plus its event stream.
struct Session {
    client: Client,
    events: Receiver<Event>,
}

impl Session {
    fn open(params: ConnectParams) -> Result<Self, SessionError> {
        let (tx, events) = mpsc::channel();
        let client = Client::new(tx);
        client.connect(params);
        let session = Self { client, events };
        session.wait(|event| matches!(event, Event::Connection(true)).then_some(()))?;
        Ok(session)
    }

    /// Next event `pick` accepts. Errors and disconnects end the wait.
    fn wait<T>(&self, mut pick: impl FnMut(Event) -> Option<T>) -> Result<T, SessionError> {
        loop {
            let event = self
                .events
                .recv_timeout(REPLY_TIMEOUT)
                .map_err(|_| SessionError::Timeout)?;
            match event {
                Event::Error(err) => return Err(err.into()),
                Event::Connection(false) => return Err(SessionError::Closed),
                other => {
                    if let Some(value) = pick(other) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    /// Wait for every queued action and surface the first error.
    fn finish(&self) -> Result<(), SessionError> {
        self.client.join();
        while let Ok(event) = self.events.try_recv() {
            if let Event::Error(err) = event {
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn albums(&self) -> Result<AlbumMap, SessionError> {
        self.client.load_albums();
        self.wait(|event| match event {
            Event::Albums(albums) => Some(albums),
            _ => None,
        })
    }

    fn playlist(&self) -> Result<Vec<Album>, SessionError> {
        self.client.load_playlist();
        self.wait(|event| match event {
            Event::Playlist(runs) => Some(runs),
            _ => None,
        })
    }

    fn status(&self) -> Result<Status, SessionError> {
        self.client.get_status();
        self.wait(|event| match event {
            Event::Status(status) => Some(status),
            _ => None,
        })
    }

    fn stats(&self) -> Result<Stats, SessionError> {
        self.client.get_stats();
        self.wait(|event| match event {
            Event::Stats(stats) => Some(stats),
            _ => None,
        })
    }
}

#[derive(Debug, Serialize)]
struct AlbumView {
    hash: String,
    title: String,
    artists: Vec<String>,
    date: Option<String>,
    tracks: usize,
    length: String,
}

impl From<&Album> for AlbumView {
    fn from(album: &Album) -> Self {
        Self {
            hash: album.hash().to_string(),
            title: album.title().to_string(),
            artists: album.album_artists().to_vec(),
            date: album.date().map(str::to_string),
            tracks: album.tracks().len(),
            length: format_duration(album.length()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    state: &'static str,
    album: Option<String>,
    track: Option<String>,
    elapsed: String,
    volume: Option<i32>,
    audio: Option<String>,
    bitrate: Option<u32>,
    error: Option<String>,
}

impl From<&Status> for StatusView {
    fn from(status: &Status) -> Self {
        let track = status
            .album
            .as_ref()
            .and_then(|album| album.tracks().get(status.pos as usize))
            .map(|track| track.title().to_string());
        Self {
            state: status.state.map(|s| s.as_str()).unwrap_or("unknown"),
            album: status.album.as_ref().map(|a| a.title().to_string()),
            track,
            elapsed: format_duration(status.elapsed),
            volume: (status.volume >= 0).then_some(status.volume),
            audio: status.audio.clone(),
            bitrate: status.bitrate,
            error: status.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsView {
    artists: u32,
    albums: u32,
    songs: u32,
    db_playtime: String,
    uptime: String,
}

impl From<&Stats> for StatsView {
    fn from(stats: &Stats) -> Self {
        Self {
            artists: stats.artists,
            albums: stats.albums,
            songs: stats.songs,
            db_playtime: format_duration_long(stats.db_playtime),
            uptime: format_duration_long(stats.uptime),
        }
    }
}

fn format_duration(seconds: u32) -> String {
    format_duration_long(u64::from(seconds))
}

fn format_duration_long(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Albums matching all keywords, sorted.
fn select_albums(albums: &AlbumMap, query: &AlbumQuery) -> Vec<Album> {
    let filter = query.filter.join(" ");
    let order = SortOrder::from(query.sort);
    let mut selected: Vec<Album> = albums
        .values()
        .filter(|album| album.matches(&filter))
        .cloned()
        .collect();
    selected.sort_by(|a, b| Album::compare(a, b, order));
    selected
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_albums(albums: &[Album], json: bool) -> Result<()> {
    let views: Vec<AlbumView> = albums.iter().map(AlbumView::from).collect();
    if json {
        return print_json(&views);
    }
    for view in &views {
        println!(
            "{} - {} ({}, {} tracks, {})",
            view.artists.join(", "),
            view.title,
            view.date.as_deref().unwrap_or("no date"),
            view.tracks,
            view.length
        );
    }
    Ok(())
}

fn print_status(status: &Status, json: bool) -> Result<()> {
    let view = StatusView::from(status);
    if json {
        return print_json(&view);
    }
    match (&view.album, &view.track) {
        (Some(album), Some(track)) => {
            println!("[{}] {} / {} ({})", view.state, album, track, view.elapsed)
        }
        (Some(album), None) => println!("[{}] {}", view.state, album),
        _ => println!("[{}]", view.state),
    }
    if let Some(volume) = view.volume {
        println!("volume: {volume}%");
    }
    if let Some(error) = &view.error {
        println!("error: {error}");
    }
    Ok(())
}

fn resolve_password(cli: &Cli, config: &Config) -> Option<String> {
    if let Some(password) = cli.password.clone().or_else(|| config.connection.password.clone()) {
        return Some(password);
    }
    let ConnectParams { host, port, .. } = config.connect_params(None);
    match CredentialStore::new().lookup_password(&host, port) {
        Ok(password) => password,
        Err(err) => {
            tracing::warn!(error = %err, "keyring lookup failed, connecting without password");
            None
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let mut config = Config::load_or_default(&dirs)?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    if cli.save {
        let path = config.save(&dirs)?;
        println!("Saved configuration to {}", path.display());
    }
    let logging = init_logging(&config.logging, &dirs)?;
    tracing::debug!(log_file = %logging.log_file().display(), "logging initialised");

    if let Command::Password(command) = &cli.command {
        let store = CredentialStore::new();
        let (host, port) = (&config.connection.host, config.connection.port);
        match command {
            PasswordCommand::Set { password } => store.store(host, port, password)?,
            PasswordCommand::Clear => store.delete(host, port)?,
        }
        return Ok(());
    }

    let password = resolve_password(&cli, &config);
    let params = config.connect_params(password);
    tracing::info!(host = %params.host, port = params.port, "connecting");
    let session = Session::open(params)
        .with_context(|| format!("failed to connect to {}:{}", config.connection.host, config.connection.port))?;

    run(&cli, &session, &config, &dirs)?;
    session.client.shutdown();
    Ok(())
}

fn run(cli: &Cli, session: &Session, config: &Config, dirs: &AppDirs) -> Result<()> {
    let client = &session.client;
    match &cli.command {
        Command::Status => {
            // The current album is only resolved against a loaded queue.
            session.playlist()?;
            print_status(&session.status()?, cli.json)?;
        }
        Command::Stats => {
            let view = StatsView::from(&session.stats()?);
            if cli.json {
                print_json(&view)?;
            } else {
                println!(
                    "{} artists, {} albums, {} songs ({} total, up {})",
                    view.artists, view.albums, view.songs, view.db_playtime, view.uptime
                );
            }
        }
        Command::Albums(query) => {
            let albums = select_albums(&session.albums()?, query);
            print_albums(&albums, cli.json)?;
        }
        Command::Playlist => print_albums(&session.playlist()?, cli.json)?,
        Command::Play(query) => {
            let albums = select_albums(&session.albums()?, query);
            if albums.is_empty() {
                bail!("no album matches {:?}", query.filter.join(" "));
            }
            session.status()?;
            let hashes: Vec<_> = albums.iter().map(|album| album.hash().clone()).collect();
            client.play_albums(&hashes);
            session.finish()?;
            print_albums(&albums, cli.json)?;
        }
        Command::Jump { filter } => {
            let filter = filter.join(" ");
            let runs = session.playlist()?;
            let run = runs
                .iter()
                .find(|run| run.matches(&filter))
                .ok_or_else(|| anyhow!("no queued album matches {filter:?}"))?;
            client.play_album_from_playlist(run);
            session.finish()?;
        }
        Command::Remove { filter } => {
            let filter = filter.join(" ");
            let runs: Vec<Album> = session
                .playlist()?
                .into_iter()
                .filter(|run| run.matches(&filter))
                .collect();
            client.remove_albums_from_playlist(&runs);
            session.finish()?;
            println!("Removed {} album(s) from the queue", runs.len());
        }
        Command::Toggle => {
            let status = session.status()?;
            client.playpause();
            session.finish()?;
            let next = match status.state {
                Some(PlayerState::Play) => PlayerState::Pause,
                _ => PlayerState::Play,
            };
            println!("{}", next.as_str());
        }
        Command::Stop => {
            client.stop();
            session.finish()?;
        }
        Command::Volume { value } => {
            client.set_volume(*value);
            session.finish()?;
        }
        Command::Seek { pos, seconds } => {
            client.seek(*pos, *seconds);
            session.finish()?;
        }
        Command::Clear => {
            client.clear_playlist();
            session.finish()?;
        }
        Command::Update => {
            client.update();
            session.finish()?;
        }
        Command::Watch => watch(session, cli.json)?,
        Command::Thumbnails(query) => {
            let albums = select_albums(&session.albums()?, query);
            let resolver = client.cover_resolver().unwrap_or_else(|| {
                CoverResolver::new(&config.connection.host, &config.connection.image_dir)
            });
            let cache = ThumbnailCache::open(
                &dirs.thumbnail_cache_dir(),
                &config.connection.host,
                config.cache.thumbnail_size,
            )?;
            let dir = cache.dir().to_path_buf();
            let loader = ThumbnailLoader::new(cache, resolver);
            let handle = BatchRenderer::new().start(albums, loader, |album, image| {
                let marker = if image.is_some() { "ok" } else { "no cover" };
                println!("{marker:>8}  {}", album.title());
            })?;
            let done = handle
                .join()
                .map_err(|_| anyhow!("thumbnail worker panicked"))?;
            println!("{done} album(s) processed, cache at {}", dir.display());
        }
        Command::Password(_) => {}
    }
    Ok(())
}

/// Print state changes until the connection drops.
fn watch(session: &Session, json: bool) -> Result<()> {
    session.playlist()?;
    print_status(&session.status()?, json)?;
    loop {
        let Ok(event) = session.events.recv() else {
            return Ok(());
        };
        match event {
            Event::Status(status) => print_status(&status, json)?,
            Event::Playlist(runs) => println!("queue changed: {} album(s)", runs.len()),
            Event::Albums(albums) => println!("library changed: {} album(s)", albums.len()),
            Event::Stats(_) => {}
            Event::Error(err) => eprintln!("error: {err}"),
            Event::Connection(true) => println!("connected"),
            Event::Connection(false) => bail!(SessionError::Closed),
        }
    }
}
