// ABOUTME: Byte-oriented line transport over plain or TLS TCP connections
// ABOUTME: Offers delimiter reads, exact-count reads and buffered writes to the framing layer

use crate::client::config::ConnectionConfig;
use crate::client::error::{StompError, StompResult};
use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// The underlying socket, with or without TLS. Everything above this enum is
/// oblivious to which one is in play.
pub enum Stream {
    Tcp(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// Read half of a split connection.
pub type ReadTransport = Transport<ReadHalf<Stream>>;
/// Write half of a split connection.
pub type WriteTransport = Transport<WriteHalf<Stream>>;

/// A buffered, mode-switching wrapper over a byte-oriented connection.
///
/// Three read modes are offered: read one line up to a delimiter, skip blank
/// lines then read a line, and read an exact byte count regardless of any
/// embedded delimiters. Data is pulled from the socket in chunks and parked
/// in an internal buffer, so a read that stops short of its delimiter simply
/// resumes on the next call.
pub struct Transport<T> {
    io: T,
    buffer: BytesMut,
}

impl<T> Transport<T> {
    pub fn new(io: T) -> Transport<T> {
        Transport {
            io,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }
}

impl<T: AsyncRead + Unpin> Transport<T> {
    /// Reads bytes up to and including the first `delimiter`. Returns the
    /// line including the delimiter. EOF before the delimiter arrives is an
    /// `UnexpectedEof` error.
    pub async fn read_line(&mut self, delimiter: u8) -> io::Result<Bytes> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == delimiter) {
                return Ok(self.buffer.split_to(pos + 1).freeze());
            }
            if 0 == self.io.read_buf(&mut self.buffer).await? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }
        }
    }

    /// Skips lines consisting of the bare delimiter and returns the first
    /// non-empty line, delimiter included.
    pub async fn fast_forward(&mut self, delimiter: u8) -> io::Result<Bytes> {
        loop {
            let line = self.read_line(delimiter).await?;
            if line.len() > 1 {
                return Ok(line);
            }
        }
    }

    /// Reads exactly `n` bytes, regardless of embedded LF or NUL bytes.
    pub async fn read_bytes(&mut self, n: usize) -> io::Result<Bytes> {
        while self.buffer.len() < n {
            if 0 == self.io.read_buf(&mut self.buffer).await? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-read",
                ));
            }
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Returns whatever bytes are available: the parked buffer if non-empty,
    /// otherwise the next chunk off the socket. An empty chunk means EOF.
    pub async fn read_chunk(&mut self) -> io::Result<Bytes> {
        if self.buffer.is_empty() && 0 == self.io.read_buf(&mut self.buffer).await? {
            return Ok(Bytes::new());
        }
        Ok(self.buffer.split().freeze())
    }
}

impl<T: AsyncWrite + Unpin> Transport<T> {
    /// Writes a byte sequence and flushes it to the socket.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await
    }

    /// Orderly shutdown of the write direction.
    pub async fn close(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

impl Transport<Stream> {
    /// Establishes the TCP connection (and the TLS session when the config
    /// says `secure`). The caller is expected to hold the connect timeout
    /// over this.
    pub async fn connect(config: &ConnectionConfig) -> StompResult<Transport<Stream>> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(StompError::Transport)?;

        let stream = if config.secure {
            let connector = match &config.ssl_opts {
                Some(connector) => connector.clone(),
                None => native_tls::TlsConnector::new()?,
            };
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let tls = connector.connect(&config.host, tcp).await?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Tcp(tcp)
        };

        Ok(Transport::new(stream))
    }

    /// Splits into independently owned read and write halves. Bytes already
    /// parked in the buffer stay with the read half. The receiver task takes
    /// the read half, the session keeps the write half; neither side ever
    /// touches the other's direction.
    pub fn split(self) -> (ReadTransport, WriteTransport) {
        let (read, write) = tokio::io::split(self.io);
        (
            Transport {
                io: read,
                buffer: self.buffer,
            },
            Transport::new(write),
        )
    }
}
