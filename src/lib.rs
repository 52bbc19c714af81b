//! # wsconnect
//! The client side of a WebSocket endpoint (RFC 6455): turns a URI string into a
//! connection object, enforces the transport security policy before any network I/O
//! happens, and drives the asynchronous connect and opening handshake to completion.
//!
//! Acquisition is two-phase. [`Endpoint::acquire`] validates the URI and registers a
//! [`Connection`] in state [`State::Created`]; the caller may then configure it (extra
//! request headers, offered subprotocols) before [`Endpoint::start`] begins the
//! transport connect. The returned [`ConnectFuture`] resolves exactly once, with either
//! the open connection or a classified [`WebSocketError`].
//!
//! Frame encoding, extension negotiation and the close handshake are not handled here.
//! Once a connection is [`State::Open`] the upgraded byte stream can be taken with
//! [`Connection::take_stream`] and handed to a frame codec.
//!
//! # Features
//! - `logging` (default): lifecycle diagnostics through the `log` crate. Logging never
//!   affects control flow.
//!
//! # Example
//! ```no_run
//! use wsconnect::{Endpoint, ErrorKind};
//!
//! #[tokio::main]
//! async fn main() -> wsconnect::Result<()> {
//!     let endpoint = Endpoint::client();
//!
//!     // plain endpoints refuse secure targets before touching the network
//!     let err = endpoint.acquire("wss://example.com/chat").unwrap_err();
//!     assert_eq!(err.kind(), ErrorKind::EndpointNotSecure);
//!
//!     let con = endpoint.acquire("ws://example.com/chat")?;
//!     con.set_header("Authorization", "Bearer token123")?;
//!
//!     let con = endpoint.start(&con).await?;
//!     let _stream = con.take_stream();
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod connect;
mod connection;
mod endpoint;
pub mod handshake;
mod options;
mod stream;
pub mod transport;
pub mod uri;

use thiserror::Error;

pub use connect::ConnectFuture;
pub use connection::{Connection, ConnectionId, State};
pub use endpoint::{Endpoint, Role};
pub use handshake::{HandshakeError, HyperHandshake};
pub use options::Options;
pub use stream::{HttpStream, Io, MaybeTlsStream};
pub use transport::{TcpTransport, TlsTransport};
pub use uri::{Uri, UriError};

/// A result type for endpoint operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents every way acquiring or connecting a WebSocket can fail.
///
/// The set is closed: each failure path produces exactly one of these values. Use
/// [`WebSocketError::kind`] to branch on the cause programmatically and
/// [`WebSocketError::is_retryable`] to tell configuration errors apart from network
/// failures.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The target string is not a valid `ws://` or `wss://` URI.
    #[error("Invalid uri: {0}")]
    InvalidUri(#[from] UriError),

    /// The URI requests a secure session but the endpoint's transport cannot provide one.
    #[error("Endpoint is not secure")]
    EndpointNotSecure,

    /// The endpoint could not instantiate a new connection, usually because the
    /// configured connection limit was reached.
    #[error("Connection creation failed: {0}")]
    ConnectionCreationFailed(String),

    /// The connection was started on an endpoint other than the one that created it.
    #[error("Connection belongs to another endpoint")]
    ForeignConnection,

    /// A request header set on a connection or endpoint is not valid HTTP.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The transport-level connect attempt failed.
    #[error("Transport connect failed: {0}")]
    TransportConnectFailed(#[source] std::io::Error),

    /// The opening handshake response was invalid or the server refused the upgrade.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(#[source] HandshakeError),

    /// The connection already left the state the operation requires.
    #[error("Connection is already in a terminal state")]
    AlreadyTerminal,

    /// The connect attempt was abandoned through [`Connection::cancel`] or endpoint teardown.
    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// Fieldless classification of a [`WebSocketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUri,
    EndpointNotSecure,
    ConnectionCreationFailed,
    ForeignConnection,
    InvalidHeader,
    TransportConnectFailed,
    HandshakeRejected,
    AlreadyTerminal,
    Cancelled,
}

impl WebSocketError {
    /// Returns the classified cause of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUri(_) => ErrorKind::InvalidUri,
            Self::EndpointNotSecure => ErrorKind::EndpointNotSecure,
            Self::ConnectionCreationFailed(_) => ErrorKind::ConnectionCreationFailed,
            Self::ForeignConnection => ErrorKind::ForeignConnection,
            Self::InvalidHeader(_) => ErrorKind::InvalidHeader,
            Self::TransportConnectFailed(_) => ErrorKind::TransportConnectFailed,
            Self::HandshakeRejected(_) => ErrorKind::HandshakeRejected,
            Self::AlreadyTerminal => ErrorKind::AlreadyTerminal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a fresh attempt against the same target could succeed.
    ///
    /// Only network-level failures qualify. Configuration errors like
    /// [`WebSocketError::InvalidUri`] or [`WebSocketError::EndpointNotSecure`] fail the
    /// same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportConnectFailed(_) | Self::HandshakeRejected(_)
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidUri => "invalid_uri",
            Self::EndpointNotSecure => "endpoint_not_secure",
            Self::ConnectionCreationFailed => "connection_creation_failed",
            Self::ForeignConnection => "foreign_connection",
            Self::InvalidHeader => "invalid_header",
            Self::TransportConnectFailed => "transport_connect_failed",
            Self::HandshakeRejected => "handshake_rejected",
            Self::AlreadyTerminal => "already_terminal",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        assert!(!WebSocketError::EndpointNotSecure.is_retryable());
        assert!(!WebSocketError::InvalidUri(UriError::MissingHost).is_retryable());
        assert!(!WebSocketError::AlreadyTerminal.is_retryable());
        assert!(!WebSocketError::ForeignConnection.is_retryable());
        assert!(!WebSocketError::Cancelled.is_retryable());
    }

    #[test]
    fn test_network_errors_are_retryable() {
        let err = WebSocketError::TransportConnectFailed(std::io::ErrorKind::ConnectionRefused.into());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::TransportConnectFailed);

        let err = WebSocketError::HandshakeRejected(HandshakeError::InvalidStatusCode(403));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::HandshakeRejected);
    }

    #[test]
    fn test_uri_error_converts() {
        let err: WebSocketError = UriError::MissingHost.into();
        assert_eq!(err.kind(), ErrorKind::InvalidUri);
        assert_eq!(err.to_string(), "Invalid uri: missing host");
    }
}
