// ABOUTME: Error types for STOMP client operations across connection, parsing and dispatch
// ABOUTME: Provides structured error reporting with automatic conversion from underlying causes

use crate::codec::ParseError;
use std::io;
use thiserror::Error;

/// Errors surfaced by STOMP client operations.
///
/// Transport and parse failures are fatal to the connection: the receiver
/// stops and the owner is told once. The subscription precondition errors
/// are local and leave the connection untouched.
#[derive(Debug, Error)]
pub enum StompError {
    /// The underlying socket failed, or closed in the middle of a frame.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// TLS setup or handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The CONNECT handshake was answered with ERROR or an unexpected frame.
    #[error("server rejected connection: {0}")]
    ServerRejected(String),

    /// A malformed frame arrived; the connection is closed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// SUBSCRIBE to a destination that already has a subscription.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    /// UNSUBSCRIBE (or ack bookkeeping) for an unknown destination.
    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    /// Gzip decoding failed for a compressed subscription; the frame was
    /// dropped and the connection continues.
    #[error("failed to decompress message body: {0}")]
    BodyDecompression(#[source] io::Error),

    /// The requested operation does not exist under the negotiated version.
    #[error("{0} is not supported under the negotiated protocol version")]
    VersionUnsupported(&'static str),

    /// The peer closed the connection, or the session task is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connect routine exceeded its deadline.
    #[error("connect timeout")]
    Timeout,
}

/// Result type alias for STOMP operations.
pub type StompResult<T> = Result<T, StompError>;
