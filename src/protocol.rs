// ABOUTME: Encodes the per-version rules of STOMP 1.0/1.1/1.2 sessions
// ABOUTME: Covers version negotiation, command validity and semantic header forms

use crate::frame::Command;
use std::fmt;

/// Negotiated STOMP protocol version.
///
/// Ordering follows the protocol revisions, so `max()` over an
/// `accept-version` list picks the newest offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    #[default]
    V1_2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parses a single dotted-decimal version token.
    pub fn parse(token: &str) -> Option<Version> {
        match token.trim() {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }

    /// Whether `\r\n` line endings are accepted (and the CR trimmed) at this
    /// protocol level. Under 1.0 a CR before the LF is an ordinary value byte.
    pub fn accepts_crlf(&self) -> bool {
        *self >= Version::V1_1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a version header into a concrete version.
///
/// `None` or an empty string fall back to the default (1.2). A single token
/// resolves to that version; a comma-separated offer list resolves to the
/// newest recognizable entry. Unrecognized tokens are skipped, and an input
/// with no recognizable token also falls back to the default.
pub fn normalize_version(input: Option<&str>) -> Version {
    let input = match input {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Version::default(),
    };
    input
        .split(',')
        .filter_map(Version::parse)
        .max()
        .unwrap_or_default()
}

/// Whether `command` may appear on a session negotiated at `version`.
///
/// The 1.0 command set is extended by `STOMP` and `NACK` in 1.1. The
/// synthetic heartbeat pseudo-command is never a wire command.
pub fn valid_command(command: Command, version: Version) -> bool {
    match command {
        Command::Stomp | Command::Nack => version >= Version::V1_1,
        Command::Heartbeat => false,
        _ => true,
    }
}

/// The MESSAGE header that carries the id to echo in ACK/NACK frames.
///
/// 1.2 introduced a dedicated `ack` header; earlier revisions acknowledge by
/// `message-id`.
pub fn ack_header(version: Version) -> &'static str {
    match version {
        Version::V1_0 | Version::V1_1 => "message-id",
        Version::V1_2 => "ack",
    }
}

/// A header value in its semantic form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Length(usize),
    Version(Version),
}

/// Transforms known headers into their semantic form: `content-length`
/// becomes a byte count and `version` a protocol version. Anything else, and
/// any known header whose value does not parse, stays text.
pub fn format_header(name: &str, value: &str) -> HeaderValue {
    match name {
        "content-length" => value
            .trim()
            .parse()
            .map(HeaderValue::Length)
            .unwrap_or_else(|_| HeaderValue::Text(value.to_string())),
        "version" => Version::parse(value)
            .map(HeaderValue::Version)
            .unwrap_or_else(|| HeaderValue::Text(value.to_string())),
        _ => HeaderValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version::V1_0 < Version::V1_1);
        assert!(Version::V1_1 < Version::V1_2);
    }

    #[test]
    fn normalize_defaults() {
        assert_eq!(normalize_version(None), Version::V1_2);
        assert_eq!(normalize_version(Some("")), Version::V1_2);
        assert_eq!(normalize_version(Some("   ")), Version::V1_2);
    }

    #[test]
    fn normalize_single_token() {
        assert_eq!(normalize_version(Some("1.0")), Version::V1_0);
        assert_eq!(normalize_version(Some("1.1")), Version::V1_1);
    }

    #[test]
    fn normalize_list_takes_maximum() {
        assert_eq!(normalize_version(Some("1.0,1.1")), Version::V1_1);
        assert_eq!(normalize_version(Some("1.2,1.0,1.1")), Version::V1_2);
        assert_eq!(normalize_version(Some("1.1, 1.0")), Version::V1_1);
    }

    #[test]
    fn normalize_skips_unrecognized_tokens() {
        assert_eq!(normalize_version(Some("2.0,1.1")), Version::V1_1);
        assert_eq!(normalize_version(Some("banana")), Version::V1_2);
    }

    #[test]
    fn command_validity_per_version() {
        assert!(valid_command(Command::Connect, Version::V1_0));
        assert!(valid_command(Command::Ack, Version::V1_0));
        assert!(!valid_command(Command::Nack, Version::V1_0));
        assert!(!valid_command(Command::Stomp, Version::V1_0));
        assert!(valid_command(Command::Nack, Version::V1_1));
        assert!(valid_command(Command::Stomp, Version::V1_2));
        assert!(!valid_command(Command::Heartbeat, Version::V1_2));
    }

    #[test]
    fn ack_header_per_version() {
        assert_eq!(ack_header(Version::V1_0), "message-id");
        assert_eq!(ack_header(Version::V1_1), "message-id");
        assert_eq!(ack_header(Version::V1_2), "ack");
    }

    #[test]
    fn format_header_semantic_forms() {
        assert_eq!(
            format_header("content-length", "24"),
            HeaderValue::Length(24)
        );
        assert_eq!(
            format_header("version", "1.1"),
            HeaderValue::Version(Version::V1_1)
        );
        assert_eq!(
            format_header("destination", "/queue/a"),
            HeaderValue::Text("/queue/a".to_string())
        );
        assert_eq!(
            format_header("content-length", "many"),
            HeaderValue::Text("many".to_string())
        );
    }
}
