//! Transport handles owned by a connection.

use std::{
    io,
    pin::{pin, Pin},
    task::{Context, Poll},
};

use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// A TCP stream that may be wrapped in TLS, produced by
/// [`TlsTransport`](crate::TlsTransport) depending on the URI scheme.
pub enum MaybeTlsStream {
    /// Plain TCP, used for `ws://`.
    Plain(TcpStream),
    /// TLS over TCP, used for `wss://`.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => pin!(stream).poll_read(cx, buf),
            Self::Tls(stream) => pin!(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => pin!(stream).poll_write(cx, buf),
            Self::Tls(stream) => pin!(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => pin!(stream).poll_flush(cx),
            Self::Tls(stream) => pin!(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => pin!(stream).poll_shutdown(cx),
            Self::Tls(stream) => pin!(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Object-safe alias for the byte streams a handshake can hand back.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// The byte stream of an open WebSocket session, after the HTTP upgrade.
///
/// This is what [`Connection::take_stream`](crate::Connection::take_stream) hands to the
/// application. Frame encoding and decoding happen on top of it.
pub enum HttpStream {
    /// The hyper-based upgraded stream.
    Hyper(TokioIo<Upgraded>),
    /// Any other stream, as produced by a custom [`Handshake`](crate::handshake::Handshake).
    Other(Box<dyn Io>),
}

impl HttpStream {
    /// Wraps an arbitrary stream.
    pub fn other<S: Io + 'static>(io: S) -> Self {
        Self::Other(Box::new(io))
    }
}

impl From<TokioIo<Upgraded>> for HttpStream {
    fn from(value: TokioIo<Upgraded>) -> Self {
        Self::Hyper(value)
    }
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hyper(_) => f.write_str("HttpStream::Hyper"),
            Self::Other(_) => f.write_str("HttpStream::Other"),
        }
    }
}

impl AsyncRead for HttpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Hyper(stream) => pin!(stream).poll_read(cx, buf),
            Self::Other(stream) => pin!(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Hyper(stream) => pin!(stream).poll_write(cx, buf),
            Self::Other(stream) => pin!(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Hyper(stream) => pin!(stream).poll_flush(cx),
            Self::Other(stream) => pin!(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Hyper(stream) => pin!(stream).poll_shutdown(cx),
            Self::Other(stream) => pin!(stream).poll_shutdown(cx),
        }
    }
}
