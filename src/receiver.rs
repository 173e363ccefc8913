//! Pulls complete frames off the transport, one at a time.
//!
//! Two modes are offered. The synchronous read is used exactly once per
//! connection, for the CONNECTED/ERROR handshake reply. After that the
//! receiver runs as its own task and the session drives it pull-by-pull:
//! each `NextFrame` command produces exactly one event, so a session that
//! has not finished dispatching never has a second frame in flight.

use crate::codec::{self, FrameParser, ParseError};
use crate::client::error::{StompError, StompResult};
use crate::frame::{Command, Frame};
use crate::protocol::Version;
use crate::transport::Transport;
use std::io;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Requests the session may issue to the receiver task.
#[derive(Debug)]
pub enum ReceiverCommand {
    /// Read one frame and emit one event.
    NextFrame,
    /// Switch line-ending rules; applied between frames.
    SetVersion(Version),
    /// Stop the task.
    Shutdown,
}

/// What the receiver reports back to the session.
#[derive(Debug)]
pub enum ReceiverEvent {
    Frame(Frame),
    Failed(StompError),
}

/// Reads a single frame using the mode reads of the line transport. This is
/// the handshake path: it runs on the unsplit connection before the receiver
/// task exists, so heartbeats cannot occur and blank lines are skipped.
pub async fn read_frame_sync<T: AsyncRead + Unpin>(
    transport: &mut Transport<T>,
    version: Version,
) -> StompResult<Frame> {
    let command = loop {
        let line = transport.fast_forward(b'\n').await?;
        let line = strip_eol(&line, version);
        let token = match std::str::from_utf8(line) {
            Ok(token) => codec::trim_token(token),
            Err(_) => {
                return Err(ParseError::BadCommand(
                    String::from_utf8_lossy(line).into_owned(),
                )
                .into());
            }
        };
        if token.is_empty() {
            continue;
        }
        break Command::from_token(token)
            .ok_or_else(|| ParseError::BadCommand(token.to_string()))?;
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let line = transport.read_line(b'\n').await?;
        let line = strip_eol(&line, version);
        if line.is_empty() {
            break;
        }
        let (name, value) = codec::split_header(line)
            .ok_or_else(|| ParseError::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;
        if headers.iter().any(|(k, _)| *k == name) {
            tracing::warn!(header = %name, "dropping repeated header");
        } else {
            headers.push((name, value));
        }
    }

    let declared = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty());
    let body = match declared {
        Some(raw) => {
            let length: usize = raw
                .trim()
                .parse()
                .map_err(|_| ParseError::BadContentLength(raw.to_string()))?;
            if length > codec::MAX_BODY_SIZE {
                return Err(ParseError::OversizedBody {
                    length,
                    limit: codec::MAX_BODY_SIZE,
                }
                .into());
            }
            // The extra byte is the mandatory trailing NUL.
            let bytes = transport.read_bytes(length + 1).await?;
            if bytes[length] != 0 {
                return Err(ParseError::MissingNullTerminator.into());
            }
            bytes[..length].to_vec()
        }
        None => {
            let chunk = transport.read_line(0).await?;
            codec::trim_body(&chunk).to_vec()
        }
    };

    Ok(Frame {
        command,
        headers,
        body,
    })
}

fn strip_eol<'a>(line: &'a [u8], version: Version) -> &'a [u8] {
    let line = match line.last() {
        Some(b'\n') => &line[..line.len() - 1],
        _ => line,
    };
    if version.accepts_crlf() && line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// Streaming frame receiver: the read half of the connection plus the
/// incremental parser carrying mid-frame state across reads.
pub struct Receiver<T> {
    transport: Transport<T>,
    parser: FrameParser,
}

impl<T: AsyncRead + Unpin> Receiver<T> {
    pub fn new(transport: Transport<T>, version: Version) -> Receiver<T> {
        Receiver {
            transport,
            parser: FrameParser::new(version),
        }
    }

    /// Reads one complete frame, resuming any partial frame left over from
    /// the previous call. A clean EOF between frames is `ConnectionClosed`;
    /// EOF with a frame in progress is a transport error.
    pub async fn next_frame(&mut self) -> StompResult<Frame> {
        loop {
            if let Some(frame) = self.parser.next_frame()? {
                return Ok(frame);
            }
            let chunk = self.transport.read_chunk().await?;
            if chunk.is_empty() {
                return if self.parser.is_idle() {
                    Err(StompError::ConnectionClosed)
                } else {
                    Err(StompError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-frame",
                    )))
                };
            }
            self.parser.feed(&chunk);
        }
    }
}

impl<T: AsyncRead + Unpin + Send + 'static> Receiver<T> {
    /// Spawns the receiver task. One `NextFrame` in produces one event out;
    /// a failure event is final and ends the task.
    pub fn spawn(self, events: mpsc::UnboundedSender<ReceiverEvent>) -> ReceiverHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(command_rx, events));
        ReceiverHandle { commands, task }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ReceiverCommand>,
        events: mpsc::UnboundedSender<ReceiverEvent>,
    ) {
        while let Some(command) = commands.recv().await {
            match command {
                ReceiverCommand::NextFrame => match self.next_frame().await {
                    Ok(frame) => {
                        tracing::debug!(command = %frame.command, "received frame");
                        if events.send(ReceiverEvent::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = events.send(ReceiverEvent::Failed(err));
                        break;
                    }
                },
                ReceiverCommand::SetVersion(version) => self.parser.set_version(version),
                ReceiverCommand::Shutdown => break,
            }
        }
    }
}

/// Session-side handle to the receiver task.
pub struct ReceiverHandle {
    commands: mpsc::UnboundedSender<ReceiverCommand>,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn request_next_frame(&self) {
        let _ = self.commands.send(ReceiverCommand::NextFrame);
    }

    pub fn set_version(&self, version: Version) {
        let _ = self.commands.send(ReceiverCommand::SetVersion(version));
    }

    /// Stops the task unconditionally, aborting any in-flight read.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ReceiverCommand::Shutdown);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn handshake_read_parses_connected() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"CONNECTED\nversion:1.2\nsession:abc\n\n\x00\n")
            .await
            .unwrap();

        let mut transport = Transport::new(client);
        let frame = read_frame_sync(&mut transport, Version::V1_2).await.unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("session"), Some("abc"));
        assert!(frame.body.is_empty());
    }

    #[tokio::test]
    async fn handshake_read_skips_leading_blank_lines() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"\n\nERROR\nmessage:denied\n\ngo away\x00")
            .await
            .unwrap();

        let mut transport = Transport::new(client);
        let frame = read_frame_sync(&mut transport, Version::V1_2).await.unwrap();
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.header("message"), Some("denied"));
        assert_eq!(frame.body, b"go away");
    }

    #[tokio::test]
    async fn handshake_read_honors_content_length() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"CONNECTED\ncontent-length:5\n\nab\x00cd\x00")
            .await
            .unwrap();

        let mut transport = Transport::new(client);
        let frame = read_frame_sync(&mut transport, Version::V1_2).await.unwrap();
        assert_eq!(frame.body, b"ab\x00cd");
    }

    #[tokio::test]
    async fn handshake_read_rejects_oversized_content_length() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"CONNECTED\ncontent-length:18446744073709551615\n\n")
            .await
            .unwrap();

        let mut transport = Transport::new(client);
        assert!(matches!(
            read_frame_sync(&mut transport, Version::V1_2).await,
            Err(StompError::Protocol(ParseError::OversizedBody { .. }))
        ));
    }

    #[tokio::test]
    async fn streaming_receiver_delivers_in_wire_order() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"MESSAGE\nmessage-id:1\n\nfirst\x00MESSAGE\nmessage-id:2\n\nsecond\x00")
            .await
            .unwrap();

        let mut receiver = Receiver::new(Transport::new(client), Version::V1_2);
        let first = receiver.next_frame().await.unwrap();
        let second = receiver.next_frame().await.unwrap();
        assert_eq!(first.header("message-id"), Some("1"));
        assert_eq!(first.body, b"first");
        assert_eq!(second.header("message-id"), Some("2"));
        assert_eq!(second.body, b"second");
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_connection_closed() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker.write_all(b"MESSAGE\n\nx\x00").await.unwrap();
        drop(broker);

        let mut receiver = Receiver::new(Transport::new(client), Version::V1_2);
        receiver.next_frame().await.unwrap();
        assert!(matches!(
            receiver.next_frame().await,
            Err(StompError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_a_transport_error() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker.write_all(b"MESSAGE\nmessage-id:1\n").await.unwrap();
        drop(broker);

        let mut receiver = Receiver::new(Transport::new(client), Version::V1_2);
        assert!(matches!(
            receiver.next_frame().await,
            Err(StompError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn pull_model_emits_one_event_per_request() {
        let (mut broker, client) = tokio::io::duplex(256);
        broker
            .write_all(b"MESSAGE\nmessage-id:1\n\na\x00MESSAGE\nmessage-id:2\n\nb\x00")
            .await
            .unwrap();

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = Receiver::new(Transport::new(client), Version::V1_2).spawn(events_tx);

        handle.request_next_frame();
        let ReceiverEvent::Frame(first) = events.recv().await.unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(first.header("message-id"), Some("1"));

        // No second event until the next pull.
        assert!(events.try_recv().is_err());

        handle.request_next_frame();
        let ReceiverEvent::Frame(second) = events.recv().await.unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(second.header("message-id"), Some("2"));

        handle.shutdown();
    }
}
