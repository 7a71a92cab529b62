//! In-process MPD stand-in for driving the client over real sockets.

#![allow(dead_code)]

use mcg_core::{ConnectParams, Event};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

type Responder = Box<dyn Fn(&str) -> String + Send>;

/// Scripted server. Commands are answered by a responder closure; `idle`
/// blocks until a queued idle response is pushed or the client sends `noidle`.
///
/// A responder returning an empty string drops the connection. Every line
/// received is logged; a command other than `noidle` arriving while idle is
/// logged as `VIOLATION <line>`.
pub struct MockMpd {
    port: u16,
    log: Arc<Mutex<Vec<String>>>,
    idle_tx: Sender<String>,
}

impl MockMpd {
    pub fn start(greeting: &str, respond: impl Fn(&str) -> String + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (idle_tx, idle_rx) = mpsc::channel();

        let greeting = format!("{greeting}\n");
        let server_log = Arc::clone(&log);
        let respond: Responder = Box::new(respond);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, &greeting, &respond, &idle_rx, &server_log);
            }
        });

        Self { port, log, idle_tx }
    }

    /// A server answering every command with a bare `OK`.
    pub fn ok() -> Self {
        Self::start("OK MPD 0.20.0", |_| "OK\n".to_string())
    }

    pub fn params(&self) -> ConnectParams {
        ConnectParams::new("127.0.0.1", self.port)
    }

    /// Answer the next `idle` with `changed:` lines for `subsystems`.
    pub fn changed(&self, subsystems: &[&str]) {
        let mut response: String = subsystems
            .iter()
            .map(|s| format!("changed: {s}\n"))
            .collect();
        response.push_str("OK\n");
        self.push_idle(&response);
    }

    /// Answer the next `idle` with a raw response.
    pub fn push_idle(&self, response: &str) {
        self.idle_tx.send(response.to_string()).unwrap();
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Logged lines other than `idle`/`noidle`.
    pub fn commands(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| line != "idle" && line != "noidle")
            .collect()
    }

    /// Wait until `count` lines equal to `line` were received.
    pub fn wait_for(&self, line: &str, count: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while self.log().iter().filter(|l| *l == line).count() < count {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {line:?}, log: {:?}",
                self.log()
            );
            thread::sleep(POLL);
        }
    }
}

fn serve(
    mut stream: TcpStream,
    greeting: &str,
    respond: &Responder,
    idle_rx: &Receiver<String>,
    log: &Mutex<Vec<String>>,
) {
    stream.set_read_timeout(Some(POLL)).unwrap();
    if stream.write_all(greeting.as_bytes()).is_err() {
        return;
    }
    let mut reader = LineReader::default();
    let record = |line: &str| log.lock().unwrap().push(line.to_string());

    loop {
        let Some(line) = reader.next_blocking(&mut stream) else {
            return;
        };
        let reply = match line.as_str() {
            // Outside of idle MPD ignores it.
            "noidle" => {
                record(&line);
                continue;
            }
            "idle" => {
                record(&line);
                loop {
                    if let Ok(response) = idle_rx.try_recv() {
                        break response;
                    }
                    match reader.poll(&mut stream) {
                        Poll::Line(next) if next == "noidle" => {
                            record(&next);
                            break "OK\n".to_string();
                        }
                        Poll::Line(next) => record(&format!("VIOLATION {next}")),
                        Poll::Closed => return,
                        Poll::Pending => {}
                    }
                }
            }
            "command_list_begin" => {
                record(&line);
                loop {
                    let Some(next) = reader.next_blocking(&mut stream) else {
                        return;
                    };
                    record(&next);
                    if next == "command_list_end" {
                        break;
                    }
                }
                respond("command_list_end")
            }
            _ => {
                record(&line);
                respond(&line)
            }
        };
        if reply.is_empty() || stream.write_all(reply.as_bytes()).is_err() {
            return;
        }
    }
}

enum Poll {
    Line(String),
    Pending,
    Closed,
}

#[derive(Default)]
struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    fn poll(&mut self, stream: &mut TcpStream) -> Poll {
        if let Some(line) = self.take_line() {
            return Poll::Line(line);
        }
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => Poll::Closed,
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                match self.take_line() {
                    Some(line) => Poll::Line(line),
                    None => Poll::Pending,
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Poll::Pending
            }
            Err(_) => Poll::Closed,
        }
    }

    fn next_blocking(&mut self, stream: &mut TcpStream) -> Option<String> {
        loop {
            match self.poll(stream) {
                Poll::Line(line) => return Some(line),
                Poll::Closed => return None,
                Poll::Pending => {}
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }
}

/// Next event matching `pred`, skipping others.
pub fn expect_event(rx: &Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(err) => panic!("no matching event: {err}"),
        }
    }
}

pub fn song(file: &str, artist: &str, album: &str, title: &str) -> String {
    format!("file: {file}\nArtist: {artist}\nAlbum: {album}\nTitle: {title}\nTime: 100\n")
}

pub fn queued(file: &str, album: &str, title: &str, pos: u32, id: u32) -> String {
    format!("{}Pos: {pos}\nId: {id}\n", song(file, "A", album, title))
}
