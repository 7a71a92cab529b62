//! Error taxonomy for the MPD session.

use std::fmt;
use thiserror::Error;

/// MPD's `ACK_ERROR_PERMISSION`.
pub const ACK_ERROR_PERMISSION: u32 = 4;

/// Errors raised while talking to MPD.
#[derive(Debug, Clone, Error)]
pub enum MpdError {
    /// Transport-level failure: resolve, connect, read, write or a truncated line.
    #[error("connection error: {message}")]
    Connection { message: String },
    /// The server violated the protocol (bad greeting or framing).
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// The server rejected a command with an `ACK` line.
    #[error("command error: {0}")]
    Command(AckError),
}

pub type MpdResult<T> = Result<T, MpdError>;

impl MpdError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Protocol { .. })
    }

    pub fn ack(&self) -> Option<&AckError> {
        match self {
            Self::Command(ack) => Some(ack),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MpdError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Parsed payload of an `ACK [<code>@<cmdnum>] {<cmdname>} <message>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckError {
    pub code: u32,
    /// 1-based index of the failing command inside a command list.
    pub command_number: u32,
    pub command_name: String,
    pub message: String,
}

impl AckError {
    /// Parse the text following the `ACK ` prefix.
    ///
    /// Text that does not follow the expected shape is kept verbatim as the
    /// message with zeroed code and command number.
    pub fn parse(payload: &str) -> Self {
        Self::parse_structured(payload.trim()).unwrap_or_else(|| Self {
            code: 0,
            command_number: 0,
            command_name: String::new(),
            message: payload.trim().to_string(),
        })
    }

    fn parse_structured(payload: &str) -> Option<Self> {
        let rest = payload.strip_prefix('[')?;
        let (location, rest) = rest.split_once(']')?;
        let (code, command_number) = location.split_once('@')?;
        let code = code.parse().ok()?;
        let command_number = command_number.parse().ok()?;

        let rest = rest.trim_start().strip_prefix('{')?;
        let (command_name, message) = rest.split_once('}')?;
        if !command_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        let message = message.strip_prefix(char::is_whitespace)?;

        Some(Self {
            code,
            command_number,
            command_name: command_name.to_string(),
            message: message.to_string(),
        })
    }

    pub fn is_permission(&self) -> bool {
        self.code == ACK_ERROR_PERMISSION
    }
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command_name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(
                f,
                "{} (code {}, command #{} '{}')",
                self.message, self.code, self.command_number, self.command_name
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ack_payload() {
        let ack = AckError::parse("[5@3] {play} no such song");
        assert_eq!(ack.code, 5);
        assert_eq!(ack.command_number, 3);
        assert_eq!(ack.command_name, "play");
        assert_eq!(ack.message, "no such song");
        assert!(!ack.is_permission());
    }

    #[test]
    fn empty_command_name_is_allowed() {
        let ack = AckError::parse("[4@0] {} you don't have permission for \"idle\"");
        assert!(ack.is_permission());
        assert_eq!(ack.command_name, "");
        assert_eq!(ack.message, "you don't have permission for \"idle\"");
    }

    #[test]
    fn unstructured_payload_is_kept_verbatim() {
        let ack = AckError::parse("something odd happened");
        assert_eq!(ack.code, 0);
        assert_eq!(ack.command_number, 0);
        assert_eq!(ack.message, "something odd happened");
    }

    #[test]
    fn only_transport_and_protocol_errors_are_fatal() {
        assert!(MpdError::connection("reset").is_fatal());
        assert!(MpdError::protocol("bad greeting").is_fatal());
        assert!(!MpdError::Command(AckError::parse("[2@0] {seek} bad")).is_fatal());
    }
}
