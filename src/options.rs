//! Endpoint configuration.

use std::time::Duration;

/// Configuration applied by an [`Endpoint`](crate::Endpoint) to every connection it creates.
///
/// By default there is no connection limit, no timeouts and no `User-Agent` header.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use wsconnect::Options;
///
/// let options = Options::default()
///     .with_max_connections(64)
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_handshake_timeout(Duration::from_secs(10))
///     .with_user_agent("wsconnect/0.1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Maximum number of connections registered at once.
    pub max_connections: Option<usize>,
    /// Upper bound on the transport-level connect.
    pub connect_timeout: Option<Duration>,
    /// Upper bound on the opening handshake exchange.
    pub handshake_timeout: Option<Duration>,
    /// `User-Agent` header sent with every opening handshake.
    pub user_agent: Option<String>,
}

impl Options {
    /// Limits how many connections may be live in the endpoint's registry.
    ///
    /// Acquisitions past the limit fail with
    /// [`WebSocketError::ConnectionCreationFailed`](crate::WebSocketError::ConnectionCreationFailed).
    pub fn with_max_connections(self, max: usize) -> Self {
        Self {
            max_connections: Some(max),
            ..self
        }
    }

    /// Sets the time allowed for the transport connect, TLS included.
    ///
    /// On expiry the connection fails with
    /// [`WebSocketError::TransportConnectFailed`](crate::WebSocketError::TransportConnectFailed)
    /// wrapping an [`std::io::ErrorKind::TimedOut`] error.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    /// Sets the time allowed for the opening handshake request and response.
    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: Some(timeout),
            ..self
        }
    }

    /// Sets the `User-Agent` header sent during the opening handshake.
    pub fn with_user_agent(self, agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(agent.into()),
            ..self
        }
    }
}
