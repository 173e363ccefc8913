// STOMP frame parser - incremental assembly of frames from a byte stream
//
// The parser is fed raw chunks as they arrive off the socket and hands back
// at most one completed frame per poll. Arrival boundaries are arbitrary: a
// frame may span many reads, and one read may carry many frames. All framing
// state lives here so a read can stop mid-command, mid-header or mid-body
// and resume on the next chunk.

use crate::frame::{Command, Frame};
use crate::protocol::Version;
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum allowed frame body size to prevent memory exhaustion from a
/// hostile or broken peer.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Frame parsing errors. Any of these poisons the connection: the receiver
/// stops and the session surfaces the failure to its owner.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unrecognized command token: {0:?}")]
    BadCommand(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("invalid content-length value: {0:?}")]
    BadContentLength(String),

    #[error("content-length {length} exceeds the {limit} byte body limit")]
    OversizedBody { length: usize, limit: usize },

    #[error("missing NUL terminator after content-length body")]
    MissingNullTerminator,
}

/// Where the parser is inside the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseState {
    /// Between frames; a blank line here is a heartbeat.
    AwaitingCommand,
    /// Command consumed, accumulating header lines.
    ReadingHeaders,
    /// Blank line seen with `content-length: N`; reading exactly N body
    /// bytes plus the mandatory trailing NUL.
    ReadingBodyByLength(usize),
    /// Blank line seen without `content-length`; body runs to the first NUL.
    ReadingBodyByTerminator,
}

/// Incremental STOMP frame parser.
///
/// Feed bytes with [`FrameParser::feed`], then drain completed frames with
/// [`FrameParser::next_frame`] until it returns `Ok(None)`. Partial input is
/// held internally and resumed on the next feed.
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    version: Version,
    buffer: BytesMut,
    command: Option<Command>,
    headers: Vec<(String, String)>,
}

impl FrameParser {
    pub fn new(version: Version) -> FrameParser {
        FrameParser {
            state: ParseState::AwaitingCommand,
            version,
            buffer: BytesMut::with_capacity(4 * 1024),
            command: None,
            headers: Vec::new(),
        }
    }

    /// Switches the line-ending rules. Takes effect from the next line read,
    /// which in practice means between frames: the session applies it right
    /// after the CONNECTED handshake, before any streaming pull.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True once the blank separator line of the current frame has been
    /// consumed and the parser is reading its body.
    pub fn headers_complete(&self) -> bool {
        matches!(
            self.state,
            ParseState::ReadingBodyByLength(_) | ParseState::ReadingBodyByTerminator
        )
    }

    /// Name of the most recently parsed header of the frame in progress.
    pub fn last_header(&self) -> Option<&str> {
        self.headers.last().map(|(name, _)| name.as_str())
    }

    /// True when no frame is in progress and no bytes are pending. Used to
    /// tell a clean EOF from one that cuts a frame in half.
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::AwaitingCommand && self.buffer.is_empty()
    }

    /// Appends raw bytes from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Advances the state machine and returns the next completed frame, or
    /// `Ok(None)` when more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        loop {
            match self.state {
                ParseState::AwaitingCommand => {
                    let Some(line) = self.take_line() else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        tracing::debug!("received heartbeat");
                        return Ok(Some(Frame::heartbeat()));
                    }
                    let token = match std::str::from_utf8(&line) {
                        Ok(token) => trim_token(token),
                        Err(_) => {
                            return Err(ParseError::BadCommand(
                                String::from_utf8_lossy(&line).into_owned(),
                            ));
                        }
                    };
                    let command = Command::from_token(token)
                        .ok_or_else(|| ParseError::BadCommand(token.to_string()))?;
                    self.command = Some(command);
                    self.state = ParseState::ReadingHeaders;
                }
                ParseState::ReadingHeaders => {
                    let Some(line) = self.take_line() else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = match self.declared_content_length()? {
                            Some(length) => ParseState::ReadingBodyByLength(length),
                            None => ParseState::ReadingBodyByTerminator,
                        };
                        continue;
                    }
                    let (name, value) = split_header(&line).ok_or_else(|| {
                        ParseError::MalformedHeader(String::from_utf8_lossy(&line).into_owned())
                    })?;
                    if self.headers.iter().any(|(k, _)| *k == name) {
                        tracing::warn!(header = %name, "dropping repeated header");
                    } else {
                        self.headers.push((name, value));
                    }
                }
                ParseState::ReadingBodyByLength(length) => {
                    // Body bytes plus the mandatory trailing NUL.
                    if self.buffer.len() < length + 1 {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(length).to_vec();
                    if self.buffer[0] != 0 {
                        return Err(ParseError::MissingNullTerminator);
                    }
                    self.buffer.advance(1);
                    return Ok(Some(self.finish(body)));
                }
                ParseState::ReadingBodyByTerminator => {
                    let Some(end) = self.buffer.iter().position(|&b| b == 0) else {
                        return Ok(None);
                    };
                    let body = self.buffer.split_to(end).to_vec();
                    self.buffer.advance(1);
                    return Ok(Some(self.finish(body)));
                }
            }
        }
    }

    /// Takes one line off the buffer, without its LF. A trailing CR is part
    /// of the line terminator from 1.1 onward; under 1.0 it is a value byte
    /// and is preserved.
    fn take_line(&mut self) -> Option<BytesMut> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(end);
        self.buffer.advance(1);
        if self.version.accepts_crlf() && line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line)
    }

    fn declared_content_length(&self) -> Result<Option<usize>, ParseError> {
        let Some((_, raw)) = self
            .headers
            .iter()
            .find(|(name, _)| name == "content-length")
        else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let length: usize = raw
            .trim()
            .parse()
            .map_err(|_| ParseError::BadContentLength(raw.clone()))?;
        if length > MAX_BODY_SIZE {
            return Err(ParseError::OversizedBody {
                length,
                limit: MAX_BODY_SIZE,
            });
        }
        Ok(Some(length))
    }

    fn finish(&mut self, body: Vec<u8>) -> Frame {
        let frame = Frame {
            // A command was stored on the way into ReadingHeaders; the body
            // states are unreachable without it.
            command: self.command.take().expect("frame without command"),
            headers: std::mem::take(&mut self.headers),
            body,
        };
        self.state = ParseState::AwaitingCommand;
        frame
    }
}

/// Strips trailing whitespace from a command token. Idempotent.
pub(crate) fn trim_token(token: &str) -> &str {
    token.trim_end()
}

/// Strips a single trailing NUL terminator from a body chunk. Idempotent.
pub(crate) fn trim_body(chunk: &[u8]) -> &[u8] {
    match chunk.last() {
        Some(0) => &chunk[..chunk.len() - 1],
        _ => chunk,
    }
}

/// Splits a `name:value` header line. Names are `[A-Za-z0-9-]+`; values are
/// arbitrary UTF-8.
pub(crate) fn split_header(line: &[u8]) -> Option<(String, String)> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (name, rest) = line.split_at(colon);
    if name.is_empty()
        || !name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return None;
    }
    let name = std::str::from_utf8(name).ok()?.to_string();
    let value = std::str::from_utf8(&rest[1..]).ok()?.to_string();
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FrameParser {
        FrameParser::new(Version::V1_2)
    }

    fn drain(parser: &mut FrameParser) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = parser.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn full_frame_without_content_length() {
        let mut p = parser();
        p.feed(
            b"MESSAGE\nmessage-id:123\nheader-2:header-val\nheader-3:header-val\n\nbody text\n\x00",
        );

        let frames = drain(&mut p);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("message-id"), Some("123"));
        assert_eq!(frame.header("header-2"), Some("header-val"));
        assert_eq!(frame.header("header-3"), Some("header-val"));
        assert_eq!(frame.body, b"body text\n");
        assert!(p.is_idle());
    }

    #[test]
    fn content_length_body_with_embedded_nuls() {
        let body = b"body text\n\x00\nbody text\n";
        let mut wire = format!("MESSAGE\ncontent-length:{}\n\n", body.len()).into_bytes();
        wire.extend_from_slice(body);
        wire.push(0);

        let mut p = parser();
        p.feed(&wire);
        let frames = drain(&mut p);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, body);
    }

    #[test]
    fn partial_frame_resumes_across_feeds() {
        let mut p = parser();
        p.feed(b"MESSAGE\nmessage-id:123\nheader-2:header-val\n");
        assert!(p.next_frame().unwrap().is_none());
        assert!(!p.headers_complete());
        assert_eq!(p.last_header(), Some("header-2"));
        assert!(!p.is_idle());

        p.feed(b"header-3:header-val\n\nbody text\n\x00");
        let frames = drain(&mut p);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("header-3"), Some("header-val"));
        assert_eq!(frame.body, b"body text\n");
    }

    #[test]
    fn body_split_mid_read_completes_later() {
        let mut p = parser();
        p.feed(b"MESSAGE\nmessage-id:9\n\nbody ");
        assert!(p.next_frame().unwrap().is_none());
        assert!(p.headers_complete());
        p.feed(b"text\n\x00");
        let frames = drain(&mut p);
        assert_eq!(frames[0].body, b"body text\n");
    }

    #[test]
    fn two_frames_back_to_back() {
        let one = b"MESSAGE\nmessage-id:123\nheader-2:header-val\nheader-3:header-val\n\nbody text\n\x00";
        let mut wire = one.to_vec();
        wire.extend_from_slice(one);

        let mut p = parser();
        p.feed(&wire);
        let frames = drain(&mut p);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(frames[0].body, b"body text\n");
    }

    #[test]
    fn single_lf_is_one_heartbeat() {
        let mut p = parser();
        p.feed(b"\n");
        let frames = drain(&mut p);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Frame::heartbeat());
        assert!(p.is_idle());
    }

    #[test]
    fn crlf_is_one_heartbeat_from_v11() {
        let mut p = FrameParser::new(Version::V1_1);
        p.feed(b"\r\n");
        let frames = drain(&mut p);
        assert_eq!(frames, vec![Frame::heartbeat()]);
    }

    #[test]
    fn crlf_line_endings_trimmed_from_headers() {
        let mut p = parser();
        p.feed(b"MESSAGE\r\nmessage-id:123\r\n\r\nbody\x00");
        let frames = drain(&mut p);
        assert_eq!(frames[0].header("message-id"), Some("123"));
    }

    #[test]
    fn v10_keeps_carriage_returns_in_values() {
        let mut p = FrameParser::new(Version::V1_0);
        p.feed(b"MESSAGE\nmessage-id:123\r\n\nbody\x00");
        let frames = drain(&mut p);
        assert_eq!(frames[0].header("message-id"), Some("123\r"));
    }

    #[test]
    fn repeated_header_first_occurrence_wins() {
        let mut p = parser();
        p.feed(b"MESSAGE\ndestination:/queue/a\ndestination:/queue/b\n\n\x00");
        let frames = drain(&mut p);
        assert_eq!(frames[0].header("destination"), Some("/queue/a"));
        assert_eq!(frames[0].headers.len(), 1);
    }

    #[test]
    fn roundtrip_encode_then_parse() {
        let original = crate::frame::FrameBuilder::send("/queue/a")
            .header("content-length", "6")
            .body(b"abc\ndef"[..6].to_vec())
            .build();

        let mut p = parser();
        p.feed(&original.to_bytes());
        assert_eq!(p.next_frame().unwrap(), Some(original));
        // The trailing LF the encoder appends after the NUL surfaces as one
        // heartbeat on the next poll, which sessions discard.
        assert_eq!(p.next_frame().unwrap(), Some(Frame::heartbeat()));
        assert!(p.is_idle());
    }

    #[test]
    fn bad_command_token_is_an_error() {
        let mut p = parser();
        p.feed(b"NONSENSE\n\n\x00");
        assert!(matches!(p.next_frame(), Err(ParseError::BadCommand(_))));
    }

    #[test]
    fn malformed_header_is_an_error() {
        let mut p = parser();
        p.feed(b"MESSAGE\nno delimiter here\n\n\x00");
        assert!(matches!(
            p.next_frame(),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn header_name_charset_is_enforced() {
        let mut p = parser();
        p.feed(b"MESSAGE\nbad header:x\n\n\x00");
        assert!(matches!(
            p.next_frame(),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn bad_content_length_is_an_error() {
        let mut p = parser();
        p.feed(b"MESSAGE\ncontent-length:lots\n\n\x00");
        assert!(matches!(
            p.next_frame(),
            Err(ParseError::BadContentLength(_))
        ));
    }

    #[test]
    fn oversized_content_length_is_rejected() {
        let mut p = parser();
        p.feed(b"MESSAGE\ncontent-length:18446744073709551615\n\n\x00");
        assert!(matches!(
            p.next_frame(),
            Err(ParseError::OversizedBody { .. })
        ));
    }

    #[test]
    fn content_length_requires_trailing_nul() {
        let mut p = parser();
        p.feed(b"MESSAGE\ncontent-length:4\n\nbodyX");
        assert!(matches!(
            p.next_frame(),
            Err(ParseError::MissingNullTerminator)
        ));
    }

    #[test]
    fn empty_content_length_falls_back_to_terminator() {
        let mut p = parser();
        p.feed(b"MESSAGE\ncontent-length:\n\nbody\x00");
        let frames = drain(&mut p);
        assert_eq!(frames[0].body, b"body");
    }

    #[test]
    fn trims_are_idempotent() {
        assert_eq!(trim_token(trim_token("MESSAGE  \t")), "MESSAGE");
        assert_eq!(trim_body(trim_body(b"body\x00")), b"body");
        assert_eq!(trim_body(b"body"), b"body");
    }
}
