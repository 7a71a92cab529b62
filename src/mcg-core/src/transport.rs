//! TCP transport for one MPD session.

use crate::command::Command;
use crate::error::{MpdError, MpdResult};
use crate::protocol::{self, Line, GREETING_PREFIX};
use socket2::{SockRef, TcpKeepalive};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Socket timeouts. `None` blocks indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub command: Option<Duration>,
    /// Read timeout while blocked in `idle`; longer than `command`.
    pub idle: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(5)),
            command: Some(Duration::from_secs(15)),
            idle: Some(Duration::from_secs(600)),
        }
    }
}

/// Outcome of waiting for an `idle` response.
#[derive(Debug)]
pub enum IdleRead {
    Lines(Vec<String>),
    TimedOut,
}

/// An open, greeted connection to MPD.
pub struct Transport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    protocol_version: String,
    timeouts: Timeouts,
}

impl Transport {
    /// Resolve, connect and read the greeting.
    pub fn connect(host: &str, port: u16, timeouts: Timeouts) -> MpdResult<Self> {
        let stream = connect_socket(host, port, timeouts.connect)?;
        stream.set_read_timeout(timeouts.command)?;
        let writer = stream.try_clone()?;
        let mut transport = Self {
            reader: BufReader::new(stream),
            writer,
            protocol_version: String::new(),
            timeouts,
        };
        match transport.greet() {
            Ok(version) => {
                transport.protocol_version = version;
                Ok(transport)
            }
            Err(err) => {
                transport.close();
                Err(err)
            }
        }
    }

    fn greet(&mut self) -> MpdResult<String> {
        let greeting = protocol::read_line(&mut self.reader)?;
        tracing::debug!(greeting = %greeting, "greeting");
        let version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| MpdError::protocol(format!("invalid greeting: {greeting}")))?;
        Ok(version.trim().to_string())
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// A second handle on the socket, used to send `noidle` from other threads.
    pub fn interrupter(&self) -> MpdResult<TcpStream> {
        Ok(self.writer.try_clone()?)
    }

    pub fn write(&mut self, command: &Command) -> MpdResult<()> {
        tracing::trace!(command = %command.loggable(), "write");
        self.writer.write_all(command.encode().as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn read_response(&mut self) -> MpdResult<Vec<String>> {
        protocol::read_response(&mut self.reader)
    }

    /// Send one command and read its response.
    pub fn call(&mut self, command: &Command) -> MpdResult<Vec<String>> {
        self.write(command)?;
        self.read_response()
    }

    /// Read the response to an already written `idle`.
    ///
    /// Only a timeout before any byte of the response arrived is reported as
    /// [`IdleRead::TimedOut`]; the session stays in idle mode in that case.
    pub fn read_idle(&mut self) -> MpdResult<IdleRead> {
        self.reader.get_ref().set_read_timeout(self.timeouts.idle)?;
        let result = self.read_idle_lines();
        self.reader.get_ref().set_read_timeout(self.timeouts.command)?;
        result
    }

    fn read_idle_lines(&mut self) -> MpdResult<IdleRead> {
        match self.reader.fill_buf() {
            Ok(_) => {}
            Err(err) if is_timeout(&err) => return Ok(IdleRead::TimedOut),
            Err(err) => return Err(err.into()),
        }
        let mut lines = Vec::new();
        loop {
            let line = protocol::read_line(&mut self.reader)?;
            match protocol::classify(line) {
                Line::Ok => return Ok(IdleRead::Lines(lines)),
                Line::Ack(ack) => return Err(MpdError::Command(ack)),
                Line::Pair(line) => lines.push(line),
            }
        }
    }

    /// Close the socket. Safe to call more than once.
    pub fn close(&mut self) {
        // NotConnected after the first shutdown is expected.
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Try every resolved address in order; the first successful connect wins.
fn connect_socket(host: &str, port: u16, timeout: Option<Duration>) -> MpdResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| MpdError::connection(format!("connection failed: {err}")))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        tracing::debug!(%addr, "connecting");
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                enable_keepalive(&stream)?;
                return Ok(stream);
            }
            Err(err) => {
                tracing::debug!(%addr, error = %err, "connect attempt failed");
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) => Err(MpdError::connection(format!("connection failed: {err}"))),
        None => Err(MpdError::connection("no suitable socket")),
    }
}

fn enable_keepalive(stream: &TcpStream) -> MpdResult<()> {
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(script: &'static [u8]) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(script).unwrap();
            socket
                .set_read_timeout(Some(Duration::from_millis(200)))
                .unwrap();
            let mut received = Vec::new();
            let _ = socket.read_to_end(&mut received);
            received
        });
        (port, handle)
    }

    #[test]
    fn greeting_yields_protocol_version() {
        let (port, server) = serve_once(b"OK MPD 0.23.5\nvolume: 40\nOK\n");
        let mut transport =
            Transport::connect("127.0.0.1", port, Timeouts::default()).expect("connect");
        assert_eq!(transport.protocol_version(), "0.23.5");
        let lines = transport.call(&Command::Status).expect("status");
        assert_eq!(lines, vec!["volume: 40".to_string()]);
        transport.close();
        transport.close();
        let received = server.join().unwrap();
        assert_eq!(received, b"status\n");
    }

    #[test]
    fn bad_greeting_is_a_protocol_error() {
        let (port, _server) = serve_once(b"HELLO\n");
        let err = Transport::connect("127.0.0.1", port, Timeouts::default())
            .err()
            .expect("greeting should be rejected");
        assert!(matches!(err, MpdError::Protocol { .. }));
    }

    #[test]
    fn truncated_greeting_is_a_connection_error() {
        let (port, _server) = serve_once(b"OK MPD 0.2");
        let err = Transport::connect("127.0.0.1", port, Timeouts::default())
            .err()
            .expect("truncated greeting");
        assert!(matches!(err, MpdError::Connection { .. }));
    }

    #[test]
    fn refused_connection_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Transport::connect("127.0.0.1", port, Timeouts::default())
            .err()
            .expect("nobody listening");
        assert!(matches!(err, MpdError::Connection { .. }));
    }
}
