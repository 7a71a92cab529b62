//! Non-blocking MPD client driven by a single worker thread.
//!
//! Every public command is queued as an [`Action`]. The worker executes the
//! queue in FIFO order and, whenever the queue is empty, parks the session in
//! MPD's `idle` command. Queuing an action while the worker is idling sends
//! `noidle`, which makes the server answer the pending `idle` right away.

use crate::command::{parse_changed, Command, Subsystem};
use crate::cover::CoverResolver;
use crate::error::{MpdError, MpdResult};
use crate::events::{Event, EventSink, PlayerState, Stats, Status};
use crate::library::{self, AlbumMap};
use crate::models::{Album, AlbumHash};
use crate::protocol::parse_record;
use crate::transport::{IdleRead, Timeouts, Transport};
use std::collections::VecDeque;
use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Music directory as seen by this machine (local) or the web server (remote).
    pub image_dir: String,
    pub timeouts: Timeouts,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            image_dir: String::new(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_image_dir(mut self, image_dir: impl Into<String>) -> Self {
        self.image_dir = image_dir.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Idling,
    Executing,
    Disconnecting,
}

/// Work queued for the worker.
#[derive(Debug)]
enum Action {
    Connect(ConnectParams),
    Disconnect,
    Status,
    Stats,
    LoadAlbums,
    LoadPlaylist,
    Update,
    ClearPlaylist,
    RemoveFromPlaylist(Vec<Album>),
    PlayFromPlaylist(Album),
    PlayAlbums(Vec<AlbumHash>),
    PlayPause,
    Seek { pos: u32, time: u32 },
    Stop,
    SetVolume(u32),
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Connect(_) => "connect",
            Action::Disconnect => "disconnect",
            Action::Status => "status",
            Action::Stats => "stats",
            Action::LoadAlbums => "load_albums",
            Action::LoadPlaylist => "load_playlist",
            Action::Update => "update",
            Action::ClearPlaylist => "clear_playlist",
            Action::RemoveFromPlaylist(_) => "remove_from_playlist",
            Action::PlayFromPlaylist(_) => "play_from_playlist",
            Action::PlayAlbums(_) => "play_albums",
            Action::PlayPause => "playpause",
            Action::Seek { .. } => "seek",
            Action::Stop => "stop",
            Action::SetVolume(_) => "set_volume",
        }
    }
}

#[derive(Default)]
struct Queue {
    actions: VecDeque<Action>,
    /// Exit once the queue has drained.
    stop: bool,
    /// A worker thread is alive for this client.
    running: bool,
    /// The worker is executing an explicit action.
    busy: bool,
    /// `idle` was written and its response is still pending.
    idling: bool,
    /// Write handle on the socket, for `noidle`.
    interrupter: Option<TcpStream>,
    state: ConnectionState,
    protocol_version: Option<String>,
    cover: Option<CoverResolver>,
}

struct Shared {
    queue: Mutex<Queue>,
    changed: Condvar,
    sink: Box<dyn EventSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Queue>) -> MutexGuard<'a, Queue> {
        self.changed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    /// Queue an action, interrupting a pending `idle`.
    fn push(&self, action: Action) {
        let mut queue = self.lock();
        if !queue.running {
            tracing::debug!(action = action.name(), "not connected, dropping action");
            return;
        }
        Self::push_locked(&mut queue, action);
        self.changed.notify_all();
    }

    fn push_locked(queue: &mut Queue, action: Action) {
        tracing::trace!(action = action.name(), "queued");
        queue.actions.push_back(action);
        Self::interrupt_idle(queue);
    }

    // Runs under the queue lock, so it cannot overtake the worker's `idle` write.
    fn interrupt_idle(queue: &mut Queue) {
        if !queue.idling {
            return;
        }
        queue.idling = false;
        if let Some(stream) = queue.interrupter.as_mut() {
            tracing::debug!("noidle");
            if let Err(err) = stream.write_all(Command::NoIdle.encode().as_bytes()) {
                tracing::warn!(error = %err, "failed to send noidle");
            }
        }
    }
}

/// Album-oriented MPD client.
///
/// Methods return immediately; outcomes are reported through the event sink
/// on the worker thread.
pub struct Client {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(sink: impl EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                changed: Condvar::new(),
                sink: Box::new(sink),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Connect, starting the worker if none is running.
    pub fn connect(&self, params: ConnectParams) {
        tracing::info!(host = %params.host, port = params.port, "connect");
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        let spawn = {
            let mut queue = self.shared.lock();
            queue.stop = false;
            Shared::push_locked(&mut queue, Action::Connect(params));
            let spawn = !queue.running;
            queue.running = true;
            self.shared.changed.notify_all();
            spawn
        };
        if !spawn {
            return;
        }

        if let Some(previous) = worker.take() {
            // Already past its last queue access.
            let _ = previous.join();
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mcg-worker".into())
            .spawn(move || Worker::new(shared).run());
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(err) => {
                {
                    let mut queue = self.shared.lock();
                    queue.running = false;
                    queue.actions.clear();
                }
                self.shared
                    .emit(Event::Error(MpdError::connection(format!("failed to start worker: {err}"))));
            }
        }
    }

    /// Close the session once the already queued actions have run.
    pub fn disconnect(&self) {
        tracing::info!("disconnect");
        let mut queue = self.shared.lock();
        if !queue.running {
            return;
        }
        queue.stop = true;
        if queue.state != ConnectionState::Disconnected {
            queue.state = ConnectionState::Disconnecting;
        }
        Shared::push_locked(&mut queue, Action::Disconnect);
        self.shared.changed.notify_all();
    }

    /// Block until every queued action has been executed.
    pub fn join(&self) {
        let mut queue = self.shared.lock();
        while queue.running && (queue.busy || !queue.actions.is_empty()) {
            queue = self.shared.wait(queue);
        }
    }

    /// Disconnect and wait for the worker thread to exit.
    pub fn shutdown(&self) {
        self.disconnect();
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        !matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Connecting
        )
    }

    /// Version announced in the server greeting of the current session.
    pub fn protocol_version(&self) -> Option<String> {
        self.shared.lock().protocol_version.clone()
    }

    /// Cover resolver for the host of the session last opened.
    pub fn cover_resolver(&self) -> Option<CoverResolver> {
        self.shared.lock().cover.clone()
    }

    pub fn get_status(&self) {
        self.shared.push(Action::Status);
    }

    pub fn get_stats(&self) {
        self.shared.push(Action::Stats);
    }

    pub fn load_albums(&self) {
        self.shared.push(Action::LoadAlbums);
    }

    pub fn load_playlist(&self) {
        self.shared.push(Action::LoadPlaylist);
    }

    /// Ask MPD to rescan its music directory.
    pub fn update(&self) {
        self.shared.push(Action::Update);
    }

    pub fn clear_playlist(&self) {
        self.shared.push(Action::ClearPlaylist);
    }

    /// Remove a playlist run (as received with [`Event::Playlist`]).
    pub fn remove_album_from_playlist(&self, album: &Album) {
        self.shared
            .push(Action::RemoveFromPlaylist(vec![album.clone()]));
    }

    /// Remove several playlist runs with one command list.
    pub fn remove_albums_from_playlist(&self, albums: &[Album]) {
        self.shared
            .push(Action::RemoveFromPlaylist(albums.to_vec()));
    }

    /// Start playback at the first song of a playlist run.
    pub fn play_album_from_playlist(&self, album: &Album) {
        self.shared.push(Action::PlayFromPlaylist(album.clone()));
    }

    /// Append a library album to the queue, starting playback if stopped.
    pub fn play_album(&self, hash: &AlbumHash) {
        self.shared.push(Action::PlayAlbums(vec![hash.clone()]));
    }

    pub fn play_albums(&self, hashes: &[AlbumHash]) {
        self.shared.push(Action::PlayAlbums(hashes.to_vec()));
    }

    pub fn playpause(&self) {
        self.shared.push(Action::PlayPause);
    }

    /// Seek to `time` seconds into the song at queue position `pos`.
    pub fn seek(&self, pos: u32, time: u32) {
        self.shared.push(Action::Seek { pos, time });
    }

    pub fn stop(&self) {
        self.shared.push(Action::Stop);
    }

    /// Set the volume, clamped to 0..=100.
    pub fn set_volume(&self, volume: u32) {
        self.shared.push(Action::SetVolume(volume.min(100)));
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Next {
    Action(Action),
    Idle,
    Exit,
}

/// State owned by the worker thread. Only the worker touches the socket,
/// the album map and the playlist.
struct Worker {
    shared: Arc<Shared>,
    transport: Option<Transport>,
    albums: AlbumMap,
    playlist: Vec<Album>,
    player_state: Option<PlayerState>,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            transport: None,
            albums: AlbumMap::new(),
            playlist: Vec::new(),
            player_state: None,
        }
    }

    fn run(mut self) {
        tracing::debug!("worker started");
        loop {
            match self.next() {
                Next::Exit => break,
                Next::Idle => self.idle(),
                Next::Action(action) => {
                    self.execute(action);
                    let mut queue = self.shared.lock();
                    queue.busy = false;
                    self.shared.changed.notify_all();
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        tracing::debug!("worker finished");
    }

    /// Next explicit action, else an `idle` wait if connected, else sleep.
    fn next(&mut self) -> Next {
        let shared = Arc::clone(&self.shared);
        let mut queue = shared.lock();
        loop {
            if let Some(action) = queue.actions.pop_front() {
                queue.busy = true;
                if self.transport.is_some() && queue.state != ConnectionState::Disconnecting {
                    queue.state = ConnectionState::Executing;
                }
                return Next::Action(action);
            }
            if queue.stop {
                // Decided under the lock: a later `connect` spawns a new worker.
                queue.running = false;
                queue.idling = false;
                queue.interrupter = None;
                queue.protocol_version = None;
                queue.state = ConnectionState::Disconnected;
                shared.changed.notify_all();
                return Next::Exit;
            }
            if let Some(transport) = self.transport.as_mut() {
                // Written under the lock so a concurrent push either sees
                // `idling` and sends noidle after it, or is seen here first.
                match transport.write(&Command::Idle) {
                    Ok(()) => {
                        tracing::debug!("idle");
                        queue.idling = true;
                        queue.state = ConnectionState::Idling;
                        return Next::Idle;
                    }
                    Err(err) => {
                        drop(queue);
                        self.fail(err, false);
                        queue = shared.lock();
                        continue;
                    }
                }
            }
            queue = shared.wait(queue);
        }
    }

    fn idle(&mut self) {
        let shared = Arc::clone(&self.shared);
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let result = match transport.read_idle() {
            Ok(IdleRead::Lines(lines)) => Ok(lines),
            Ok(IdleRead::TimedOut) => {
                tracing::debug!("idle timed out, leaving idle");
                let sent = {
                    let mut queue = shared.lock();
                    if queue.idling {
                        queue.idling = false;
                        transport.write(&Command::NoIdle)
                    } else {
                        Ok(())
                    }
                };
                sent.and_then(|()| transport.read_response())
            }
            Err(err) => Err(err),
        };

        {
            let mut queue = shared.lock();
            queue.idling = false;
            if queue.state == ConnectionState::Idling {
                queue.state = ConnectionState::Connected;
            }
        }

        match result {
            Ok(lines) => {
                let changed = parse_changed(&parse_record(&lines));
                tracing::info!(subsystems = ?changed, "idle returned");
                self.schedule(&changed);
            }
            Err(err) => self.fail(err, true),
        }
    }

    /// Queue the reloads a set of changed subsystems calls for.
    fn schedule(&self, changed: &[Subsystem]) {
        let mut albums = false;
        let mut playlist = false;
        let mut status = false;
        for subsystem in changed {
            match subsystem {
                Subsystem::Database | Subsystem::Update => {
                    albums = true;
                    playlist = true;
                    status = true;
                }
                Subsystem::Playlist => playlist = true,
                Subsystem::Player | Subsystem::Mixer => status = true,
                Subsystem::Other(name) => tracing::trace!(subsystem = %name, "ignored"),
            }
        }
        if albums {
            self.shared.push(Action::LoadAlbums);
        }
        if playlist {
            self.shared.push(Action::LoadPlaylist);
        }
        if status {
            self.shared.push(Action::Status);
        }
    }

    fn execute(&mut self, action: Action) {
        let name = action.name();
        tracing::debug!(action = name, "executing");
        let result = match action {
            Action::Connect(params) => self.connect(params),
            Action::Disconnect => {
                self.disconnect();
                Ok(())
            }
            Action::Status => self.status(),
            Action::Stats => self.stats(),
            Action::LoadAlbums => self.load_albums(),
            Action::LoadPlaylist => self.load_playlist(),
            Action::Update => self.call(Command::Update),
            Action::ClearPlaylist => self.call(Command::Clear),
            Action::RemoveFromPlaylist(albums) => self.remove_from_playlist(&albums),
            Action::PlayFromPlaylist(album) => match album.tracks().first().and_then(|t| t.id()) {
                Some(id) => self.call(Command::PlayId(id)),
                None => Ok(()),
            },
            Action::PlayAlbums(hashes) => self.play_albums(&hashes),
            Action::PlayPause => match self.player_state {
                Some(PlayerState::Play) => self.call(Command::Pause),
                _ => self.call(Command::Play),
            },
            Action::Seek { pos, time } => self.call(Command::Seek { pos, time }),
            Action::Stop => self.call(Command::Stop),
            Action::SetVolume(volume) => self.call(Command::SetVol(volume)),
        };

        match result {
            Ok(()) => {
                let mut queue = self.shared.lock();
                if queue.state == ConnectionState::Executing {
                    queue.state = ConnectionState::Connected;
                }
            }
            Err(err) => {
                tracing::error!(action = name, error = %err, "action failed");
                self.fail(err, false);
            }
        }
    }

    /// Report an error; fatal ones drop the connection and the queue.
    fn fail(&mut self, err: MpdError, during_idle: bool) {
        let fatal = err.is_fatal();
        let lost_permission = during_idle && err.ack().is_some_and(|ack| ack.is_permission());
        self.shared.emit(Event::Error(err));

        if fatal {
            let discarded = {
                let mut queue = self.shared.lock();
                queue.stop = true;
                let discarded = queue.actions.len();
                queue.actions.clear();
                discarded
            };
            if discarded > 0 {
                tracing::warn!(discarded, "connection lost, discarding queued actions");
            }
            self.teardown(true);
        } else if lost_permission {
            tracing::warn!("permission denied for idle, disconnecting");
            let mut queue = self.shared.lock();
            queue.stop = true;
            queue.state = ConnectionState::Disconnecting;
            Shared::push_locked(&mut queue, Action::Disconnect);
            self.shared.changed.notify_all();
        } else {
            let mut queue = self.shared.lock();
            if queue.state == ConnectionState::Executing {
                queue.state = ConnectionState::Connected;
            }
        }
    }

    fn teardown(&mut self, always_notify: bool) {
        let had_transport = match self.transport.take() {
            Some(mut transport) => {
                transport.close();
                true
            }
            None => false,
        };
        {
            let mut queue = self.shared.lock();
            queue.interrupter = None;
            queue.idling = false;
            queue.protocol_version = None;
            queue.state = ConnectionState::Disconnected;
        }
        if had_transport || always_notify {
            tracing::info!("disconnected");
            self.shared.emit(Event::Connection(false));
        }
    }

    fn transport(&mut self) -> MpdResult<&mut Transport> {
        self.transport
            .as_mut()
            .ok_or_else(|| MpdError::connection("not connected"))
    }

    fn call(&mut self, command: Command) -> MpdResult<()> {
        self.transport()?.call(&command).map(|_| ())
    }

    fn connect(&mut self, params: ConnectParams) -> MpdResult<()> {
        if self.transport.is_some() {
            tracing::debug!("already connected");
            return Ok(());
        }
        self.shared.lock().state = ConnectionState::Connecting;
        tracing::info!(host = %params.host, port = params.port, "connecting");

        let mut transport = Transport::connect(&params.host, params.port, params.timeouts)?;
        let interrupter = transport.interrupter()?;
        let version = transport.protocol_version().to_string();
        tracing::info!(protocol_version = %version, "connected");
        let cover = CoverResolver::new(&params.host, &params.image_dir);

        if let Some(password) = params.password {
            tracing::info!("setting password");
            if let Err(err) = transport.call(&Command::Password(password)) {
                if err.is_fatal() {
                    return Err(err);
                }
                // The session stays usable with default permissions.
                self.shared.emit(Event::Error(err));
            }
        }

        self.transport = Some(transport);
        {
            let mut queue = self.shared.lock();
            queue.interrupter = Some(interrupter);
            queue.protocol_version = Some(version);
            queue.cover = Some(cover);
            queue.state = ConnectionState::Connected;
        }
        self.shared.emit(Event::Connection(true));
        Ok(())
    }

    fn disconnect(&mut self) {
        tracing::info!("disconnecting");
        self.teardown(false);
    }

    fn status(&mut self) -> MpdResult<()> {
        let transport = self.transport()?;
        let status_lines = transport.call(&Command::Status)?;
        let song_lines = transport.call(&Command::CurrentSong)?;

        let mut status = Status::from_record(&parse_record(&status_lines));
        self.player_state = status.state;
        let song = parse_record(&song_lines);
        status.file = song.get("file").map(str::to_string);
        if let Some((album, pos)) = library::locate_current(&self.playlist, &self.albums, &song) {
            status.album = Some(album);
            status.pos = pos;
        }
        tracing::debug!(state = ?status.state, pos = status.pos, "status");
        self.shared.emit(Event::Status(status));
        Ok(())
    }

    fn stats(&mut self) -> MpdResult<()> {
        let lines = self.transport()?.call(&Command::Stats)?;
        let stats = Stats::from_record(&parse_record(&lines));
        self.shared.emit(Event::Stats(stats));
        Ok(())
    }

    fn load_albums(&mut self) -> MpdResult<()> {
        let command = Command::ListAllInfo;
        let lines = self.transport()?.call(&command)?;
        self.albums = library::aggregate_albums(&command.parse_records(&lines));
        tracing::info!(albums = self.albums.len(), "albums loaded");
        self.shared.emit(Event::Albums(self.albums.clone()));
        Ok(())
    }

    fn load_playlist(&mut self) -> MpdResult<()> {
        let command = Command::PlaylistInfo;
        let lines = self.transport()?.call(&command)?;
        self.playlist = library::aggregate_playlist(&command.parse_records(&lines));
        tracing::info!(runs = self.playlist.len(), "playlist loaded");
        self.shared.emit(Event::Playlist(self.playlist.clone()));
        Ok(())
    }

    fn remove_from_playlist(&mut self, albums: &[Album]) -> MpdResult<()> {
        let ids: Vec<u32> = albums
            .iter()
            .flat_map(|album| album.tracks())
            .filter_map(|track| track.id())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let transport = self.transport()?;
        transport.write(&Command::CommandListBegin)?;
        for id in ids {
            transport.write(&Command::DeleteId(id))?;
        }
        transport.write(&Command::CommandListEnd)?;
        transport.read_response().map(|_| ())
    }

    fn play_albums(&mut self, hashes: &[AlbumHash]) -> MpdResult<()> {
        let files: Vec<String> = hashes
            .iter()
            .filter_map(|hash| self.albums.get(hash))
            .flat_map(|album| album.tracks())
            .map(|track| track.file().to_string())
            .collect();
        let playing = self.player_state == Some(PlayerState::Play);

        let transport = self.transport()?;
        let mut ids = Vec::new();
        for file in files {
            tracing::debug!(file = %file, "addid");
            let lines = transport.call(&Command::AddId(file))?;
            if let Some(id) = parse_record(&lines).get("id").and_then(|id| id.parse().ok()) {
                ids.push(id);
            }
        }
        match ids.first() {
            Some(&first) if !playing => transport.call(&Command::PlayId(first)).map(|_| ()),
            _ => Ok(()),
        }
    }
}
