//! MPD text protocol codec.
//!
//! Requests are single lines: `<command>` or `<command> "<arg>" ...`.
//! Responses are `key: value` lines closed by `OK` or by an `ACK` error line.

use crate::error::{AckError, MpdError, MpdResult};
use std::io::BufRead;

/// Greeting sent by the server right after accept.
pub const GREETING_PREFIX: &str = "OK MPD ";
/// Terminator of a successful response.
pub const COMPLETION: &str = "OK";
/// Prefix of a failed response.
pub const ERROR_PREFIX: &str = "ACK ";

/// One entity of a response: ordered `key: value` pairs with lower-cased keys.
///
/// Keys may repeat (multi-valued tags such as `artist`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pairs: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value stored under `key`, in response order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.push(key, value);
        }
        record
    }
}

/// Quote one argument, escaping backslashes and double quotes.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Build a request line, including the trailing newline.
pub fn encode_command(name: &str, args: &[String]) -> String {
    let mut line = String::from(name);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line.push('\n');
    line
}

/// Split a `key: value` line on the first colon.
///
/// The key is lower-cased and the value left-trimmed; a line without a colon
/// yields an empty value.
pub fn split_pair(line: &str) -> (String, String) {
    match line.split_once(':') {
        Some((key, value)) => (key.to_lowercase(), value.trim_start().to_string()),
        None => (line.to_lowercase(), String::new()),
    }
}

/// Read one full line, without its terminator.
///
/// EOF or a line missing its `\n` is unrecoverable framing loss.
pub fn read_line<R: BufRead>(reader: &mut R) -> MpdResult<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    finish_line(line)
}

pub(crate) fn finish_line(mut line: String) -> MpdResult<String> {
    if !line.ends_with('\n') {
        return Err(MpdError::connection("incomplete line"));
    }
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Interpret a complete response line.
pub(crate) enum Line {
    Pair(String),
    Ok,
    Ack(AckError),
}

pub(crate) fn classify(line: String) -> Line {
    if line == COMPLETION {
        Line::Ok
    } else if let Some(payload) = line.strip_prefix(ERROR_PREFIX) {
        Line::Ack(AckError::parse(payload))
    } else {
        Line::Pair(line)
    }
}

/// Read `key: value` lines up to the closing `OK` or `ACK`.
pub fn read_response<R: BufRead>(reader: &mut R) -> MpdResult<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        match classify(read_line(reader)?) {
            Line::Ok => return Ok(lines),
            Line::Ack(ack) => return Err(MpdError::Command(ack)),
            Line::Pair(line) => lines.push(line),
        }
    }
}

/// Fold response lines into a single record.
pub fn parse_record(lines: &[String]) -> Record {
    lines.iter().map(|line| split_pair(line)).collect()
}

/// Split response lines into one record per entity.
///
/// A new record starts whenever one of `delimiters` is seen while the
/// current record is non-empty.
pub fn parse_records(lines: &[String], delimiters: &[&str]) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current = Record::new();
    for line in lines {
        let (key, value) = split_pair(line);
        if !current.is_empty() && delimiters.contains(&key.as_str()) {
            records.push(std::mem::take(&mut current));
        }
        current.push(key, value);
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_a_single_song_record() {
        let mut input = Cursor::new(b"artist: X\ntitle: Y\nfile: a.mp3\nOK\n".to_vec());
        let lines = read_response(&mut input).expect("response should parse");
        let records = parse_records(&lines, &["file"]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("artist"), Some("X"));
        assert_eq!(record.get("title"), Some("Y"));
        assert_eq!(record.get("file"), Some("a.mp3"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn ack_line_becomes_command_error() {
        let mut input = Cursor::new(b"ACK [5@3] {play} no such song\n".to_vec());
        let err = read_response(&mut input).expect_err("ack should fail");
        match err {
            MpdError::Command(ack) => {
                assert_eq!(ack.code, 5);
                assert_eq!(ack.command_number, 3);
                assert_eq!(ack.command_name, "play");
                assert_eq!(ack.message, "no such song");
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_line_is_a_connection_error() {
        let mut input = Cursor::new(b"volume: 50\nOK".to_vec());
        let err = read_response(&mut input).expect_err("truncated response");
        assert!(matches!(err, MpdError::Connection { .. }));

        let mut empty = Cursor::new(Vec::new());
        assert!(matches!(
            read_response(&mut empty),
            Err(MpdError::Connection { .. })
        ));
    }

    #[test]
    fn splits_on_first_colon_and_lowercases_key() {
        assert_eq!(
            split_pair("Time: 12:34"),
            ("time".to_string(), "12:34".to_string())
        );
        assert_eq!(split_pair("AlbumArtist:Foo"), ("albumartist".into(), "Foo".into()));
    }

    #[test]
    fn records_split_on_repeated_delimiter() {
        let lines: Vec<String> = [
            "file: a.mp3",
            "Artist: A",
            "Artist: B",
            "directory: d",
            "file: b.mp3",
            "Title: T",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let records = parse_records(&lines, &["file", "directory"]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get_all("artist").collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(records[1].get("directory"), Some("d"));
        assert_eq!(records[2].get("title"), Some("T"));
    }

    #[test]
    fn encodes_and_escapes_arguments() {
        assert_eq!(encode_command("status", &[]), "status\n");
        assert_eq!(
            encode_command("find", &["album".into(), "Say \"Hi\"".into()]),
            "find \"album\" \"Say \\\"Hi\\\"\"\n"
        );
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
    }
}
