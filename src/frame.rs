//! Provides a type representing a STOMP protocol frame as well as a builder
//! for assembling outbound frames.

use crate::protocol::Version;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// STOMP frame commands.
///
/// Commands are short uppercase ASCII tokens on the wire. `Heartbeat` is
/// synthetic: it never appears as a command line, it stands for a bare EOL
/// received (or sent) between frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    // Client commands
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    // Server commands
    Connected,
    Message,
    Receipt,
    Error,
    // Synthetic
    Heartbeat,
}

impl Command {
    /// The wire token for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Heartbeat => "HEARTBEAT",
        }
    }

    /// Looks up a wire token. The match is exact; STOMP commands are
    /// case-sensitive. `HEARTBEAT` is not accepted here since it never
    /// appears on the wire as a command line.
    pub fn from_token(token: &str) -> Option<Command> {
        let command = match token {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame: a command, an ordered list of headers and a body.
///
/// Headers preserve their wire order. When the same name appears more than
/// once, the first occurrence is authoritative and is what [`Frame::header`]
/// returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    pub fn new(command: Command) -> Frame {
        Frame {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// The synthetic frame that stands for a single heartbeat EOL.
    pub fn heartbeat() -> Frame {
        Frame::new(Command::Heartbeat)
    }

    /// Returns the value of the first header with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `content-length` header parsed as a byte count, if present and
    /// well-formed.
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// The `version` header parsed as a protocol version, if present and
    /// well-formed.
    pub fn version(&self) -> Option<Version> {
        Version::parse(self.header("version")?)
    }

    /// Normalizes the frame to its parsed form: trailing NUL terminator
    /// bytes are stripped from the body. The typed command is already
    /// canonical (token whitespace is trimmed before the lookup during
    /// parsing), so frames produced by the parser come back unchanged.
    /// Idempotent.
    pub fn clean(&self) -> Frame {
        let mut frame = self.clone();
        while frame.body.last() == Some(&0) {
            frame.body.pop();
        }
        frame
    }

    /// Serializes the frame to the wire format:
    ///
    /// ```text
    /// COMMAND LF
    /// (name ':' value LF)*
    /// LF
    /// <body> NUL LF
    /// ```
    ///
    /// The NUL terminator is always emitted, even for an empty body. The LF
    /// after the NUL is legibility padding that brokers tolerate; our own
    /// parser never relies on it. Heartbeat frames serialize to a single LF.
    pub fn encode(&self, dst: &mut BytesMut) {
        if self.command == Command::Heartbeat {
            dst.put_u8(b'\n');
            return;
        }
        dst.reserve(self.encoded_size_hint());
        dst.extend_from_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            dst.extend_from_slice(name.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.extend_from_slice(&self.body);
        dst.put_u8(0);
        dst.put_u8(b'\n');
    }

    /// Convenience wrapper around [`Frame::encode`].
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn encoded_size_hint(&self) -> usize {
        self.command.as_str().len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>()
            + self.body.len()
            + 4
    }
}

/// Fluent builder for outbound frames.
///
/// ```
/// use stomp::{Command, FrameBuilder};
///
/// let frame = FrameBuilder::send("/queue/orders")
///     .header("priority", "3")
///     .body(b"hello".to_vec())
///     .build();
/// assert_eq!(frame.command, Command::Send);
/// ```
#[derive(Debug)]
pub struct FrameBuilder {
    frame: Frame,
}

impl FrameBuilder {
    pub fn new(command: Command) -> FrameBuilder {
        FrameBuilder {
            frame: Frame::new(command),
        }
    }

    /// Replaces the command by wire token. An unknown token leaves the frame
    /// unchanged apart from a logged warning.
    pub fn command(mut self, token: &str) -> Self {
        match Command::from_token(token) {
            Some(command) => self.frame.command = command,
            None => tracing::warn!(token, "ignoring unknown STOMP command"),
        }
        self
    }

    /// Appends a header. Headers are written in insertion order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.frame.headers.push((name.into(), value.into()));
        self
    }

    /// Appends a header only when a value is present.
    pub fn optional_header(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    /// Appends every header from `headers`.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.frame.headers.push((name.into(), value.into()));
        }
        self
    }

    /// Replaces the body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.frame.body = body;
        self
    }

    /// Appends `text` and a trailing LF to the body.
    pub fn append_body(mut self, text: &str) -> Self {
        self.frame.body.extend_from_slice(text.as_bytes());
        self.frame.body.push(b'\n');
        self
    }

    /// Appends `text` to the body without a trailing LF.
    pub fn append_body_raw(mut self, text: &str) -> Self {
        self.frame.body.extend_from_slice(text.as_bytes());
        self
    }

    pub fn build(self) -> Frame {
        self.frame
    }
}

// Per-command helpers. The handshake command differs by protocol level:
// STOMP 1.0 brokers only understand CONNECT, 1.1 introduced STOMP.
impl FrameBuilder {
    pub fn connect(version: Version) -> FrameBuilder {
        let command = if version >= Version::V1_1 {
            Command::Stomp
        } else {
            Command::Connect
        };
        FrameBuilder::new(command)
    }

    pub fn send(destination: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Send).header("destination", destination)
    }

    pub fn subscribe(destination: &str, id: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn unsubscribe(id: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Unsubscribe).header("id", id)
    }

    pub fn ack() -> FrameBuilder {
        FrameBuilder::new(Command::Ack)
    }

    pub fn nack() -> FrameBuilder {
        FrameBuilder::new(Command::Nack)
    }

    pub fn begin(transaction: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Begin).header("transaction", transaction)
    }

    pub fn commit(transaction: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Commit).header("transaction", transaction)
    }

    pub fn abort(transaction: &str) -> FrameBuilder {
        FrameBuilder::new(Command::Abort).header("transaction", transaction)
    }

    pub fn disconnect() -> FrameBuilder {
        FrameBuilder::new(Command::Disconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_emits_exact_wire_bytes() {
        let frame = FrameBuilder::send("/queue/a")
            .header("content-length", "5")
            .body(b"hello".to_vec())
            .build();

        let bytes = frame.to_bytes();
        assert_eq!(
            bytes.as_ref(),
            b"SEND\ndestination:/queue/a\ncontent-length:5\n\nhello\x00\n"
        );
    }

    #[test]
    fn encode_empty_body_still_terminated() {
        let frame = FrameBuilder::disconnect().build();
        assert_eq!(frame.to_bytes().as_ref(), b"DISCONNECT\n\n\x00\n");
    }

    #[test]
    fn heartbeat_encodes_to_single_lf() {
        assert_eq!(Frame::heartbeat().to_bytes().as_ref(), b"\n");
    }

    #[test]
    fn append_body_adds_newline_raw_does_not() {
        let frame = FrameBuilder::send("/queue/a")
            .append_body("line one")
            .append_body_raw("line two")
            .build();
        assert_eq!(frame.body, b"line one\nline two");
    }

    #[test]
    fn unknown_command_is_a_no_op() {
        let frame = FrameBuilder::new(Command::Send)
            .command("FROBNICATE")
            .build();
        assert_eq!(frame.command, Command::Send);
    }

    #[test]
    fn known_command_token_replaces() {
        let frame = FrameBuilder::new(Command::Send).command("SUBSCRIBE").build();
        assert_eq!(frame.command, Command::Subscribe);
    }

    #[test]
    fn first_header_occurrence_wins() {
        let frame = FrameBuilder::new(Command::Message)
            .header("destination", "/queue/a")
            .header("destination", "/queue/b")
            .build();
        assert_eq!(frame.header("destination"), Some("/queue/a"));
    }

    #[test]
    fn handshake_command_tracks_version() {
        assert_eq!(
            FrameBuilder::connect(Version::V1_0).build().command,
            Command::Connect
        );
        assert_eq!(
            FrameBuilder::connect(Version::V1_2).build().command,
            Command::Stomp
        );
    }

    #[test]
    fn typed_header_accessors() {
        let frame = FrameBuilder::new(Command::Connected)
            .header("version", "1.1")
            .header("content-length", "42")
            .build();
        assert_eq!(frame.version(), Some(Version::V1_1));
        assert_eq!(frame.content_length(), Some(42));
    }

    #[test]
    fn clean_is_idempotent() {
        let frame = FrameBuilder::send("/queue/a")
            .body(b"payload\n\x00".to_vec())
            .build();

        let once = frame.clean();
        assert_eq!(once.body, b"payload\n");
        assert_eq!(once.clean(), once);

        // An already-clean frame passes through unchanged.
        let plain = FrameBuilder::send("/queue/a").append_body("text").build();
        assert_eq!(plain.clean(), plain);
    }
}
