//! The client endpoint: connection factory and live-connection registry.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    connect::{self, ConnectFuture},
    connection::{Connection, ConnectionId, Shared},
    handshake::{Handshake, HyperHandshake},
    options::Options,
    transport::{TcpTransport, TlsTransport, Transport},
    uri::Uri,
    Result, WebSocketError,
};

/// The role an endpoint takes.
///
/// Fixed when the endpoint is constructed. Every constructor in this crate builds a
/// client endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => {
                write!(f, "server")
            }
            Self::Client => {
                write!(f, "client")
            }
        }
    }
}

/// Creates and tracks client connections under one transport security policy.
///
/// The endpoint hands out [`Connection`] handles from [`Endpoint::acquire`] and drives
/// their connect sequence with [`Endpoint::start`]. It keeps a registry of every
/// connection that is attempting to open or is open; failed connections leave the
/// registry before their failure is reported.
///
/// Dropping the endpoint runs [`Endpoint::shutdown`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use wsconnect::{Endpoint, Options};
///
/// #[tokio::main]
/// async fn main() -> wsconnect::Result<()> {
///     let endpoint = Endpoint::secure_client()
///         .with_options(Options::default().with_connect_timeout(Duration::from_secs(5)));
///
///     let con = endpoint.acquire("wss://echo.websocket.org")?;
///     con.add_subprotocol("chat")?;
///
///     let con = endpoint.start(&con).await?;
///     println!("open, subprotocol: {:?}", con.subprotocol());
///     Ok(())
/// }
/// ```
pub struct Endpoint<T = TcpTransport, H = HyperHandshake> {
    role: Role,
    pub(crate) transport: Arc<T>,
    pub(crate) handshake: Arc<H>,
    options: Options,
    pub(crate) registry: Arc<Registry>,
}

impl Endpoint {
    /// A client endpoint over plain TCP. Secure targets fail with
    /// [`WebSocketError::EndpointNotSecure`].
    pub fn client() -> Self {
        Self::new(TcpTransport, HyperHandshake)
    }
}

impl Endpoint<TlsTransport, HyperHandshake> {
    /// A client endpoint serving both `ws://` and `wss://` targets.
    pub fn secure_client() -> Self {
        Self::new(TlsTransport::new(), HyperHandshake)
    }
}

impl<T, H> Endpoint<T, H>
where
    T: Transport,
    H: Handshake<T::Stream>,
{
    /// Creates a client endpoint over the given collaborators with default [`Options`].
    pub fn new(transport: T, handshake: H) -> Self {
        #[cfg(feature = "logging")]
        log::debug!(
            "client endpoint created (secure capable: {})",
            transport.is_secure_capable()
        );

        Self {
            role: Role::Client,
            transport: Arc::new(transport),
            handshake: Arc::new(handshake),
            options: Options::default(),
            registry: Arc::new(Registry::default()),
        }
    }

    /// Replaces the endpoint options. Connections already acquired keep running under
    /// the options they were started with.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The role this endpoint was constructed with.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Whether the transport can serve `wss://` targets.
    pub fn is_secure(&self) -> bool {
        self.transport.is_secure_capable()
    }

    /// Creates a connection to `uri` without touching the network.
    ///
    /// The connection is returned in [`State::Created`](crate::State::Created) and is
    /// registered under a fresh [`ConnectionId`]. It may be configured (headers,
    /// subprotocols) before it is passed to [`Endpoint::start`].
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidUri`] if `uri` is not a valid `ws://` or `wss://` URI.
    /// - [`WebSocketError::EndpointNotSecure`] if `uri` is `wss://` and the transport
    ///   cannot provide a secure session.
    /// - [`WebSocketError::ConnectionCreationFailed`] if the connection limit is reached.
    ///
    /// No registry entry is created on failure.
    pub fn acquire(&self, uri: &str) -> Result<Connection> {
        let uri = Uri::parse(uri)?;

        if uri.is_secure() && !self.transport.is_secure_capable() {
            #[cfg(feature = "logging")]
            log::debug!("refusing {uri}: endpoint is not secure");
            return Err(WebSocketError::EndpointNotSecure);
        }

        let con = self
            .registry
            .register(uri, self.options.max_connections, Arc::downgrade(&self.registry))?;

        #[cfg(feature = "logging")]
        log::debug!("connection {} acquired for {}", con.id(), con.uri());

        Ok(con)
    }

    /// Starts the connect sequence of a connection in [`State::Created`](crate::State::Created).
    ///
    /// The transport connect and the opening handshake run on a spawned task. The
    /// returned future resolves exactly once: with the open connection, or with
    /// [`WebSocketError::TransportConnectFailed`], [`WebSocketError::HandshakeRejected`]
    /// or [`WebSocketError::Cancelled`]. Failed connections are deregistered before the
    /// failure is delivered. Dropping the future does not abort the attempt; use
    /// [`Endpoint::cancel`] for that.
    ///
    /// The future resolves immediately, with no I/O and the connection left as it was,
    /// when a precondition fails:
    /// - [`WebSocketError::ForeignConnection`] if `con` was acquired from another endpoint.
    /// - [`WebSocketError::EndpointNotSecure`] if `con` is secure and this transport is not.
    /// - [`WebSocketError::InvalidHeader`] if the configured `User-Agent` is not valid HTTP.
    /// - [`WebSocketError::ConnectionCreationFailed`] if called outside a Tokio runtime.
    /// - [`WebSocketError::AlreadyTerminal`] if `con` was already started.
    pub fn start(&self, con: &Connection) -> ConnectFuture {
        connect::start(
            &self.transport,
            &self.handshake,
            &self.options,
            &self.registry,
            con,
        )
    }

    /// Abandons the connect attempt of `con`. See [`Connection::cancel`].
    pub fn cancel(&self, con: &Connection) {
        con.cancel();
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Handles to every registered connection.
    pub fn connections(&self) -> Vec<Connection> {
        self.registry.snapshot()
    }

    /// Cancels every connection still connecting and clears the registry.
    ///
    /// Open connections are unaffected; they stay usable through the handles the
    /// application holds.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl<T, H> Drop for Endpoint<T, H> {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

/// Non-owning index of live connections.
#[derive(Default)]
pub(crate) struct Registry {
    live: Mutex<HashMap<ConnectionId, Weak<Shared>>>,
}

impl Registry {
    fn register(
        &self,
        uri: Uri,
        max_connections: Option<usize>,
        this: Weak<Registry>,
    ) -> Result<Connection> {
        let mut live = self.live.lock();

        if let Some(max) = max_connections {
            if live.len() >= max {
                return Err(WebSocketError::ConnectionCreationFailed(format!(
                    "connection limit of {max} reached"
                )));
            }
        }

        let con = Connection::new(uri, this);
        live.insert(con.id(), con.downgrade());
        Ok(con)
    }

    pub(crate) fn deregister(&self, id: ConnectionId) {
        if self.live.lock().remove(&id).is_some() {
            #[cfg(feature = "logging")]
            log::debug!("connection {id} deregistered");
        }
    }

    fn len(&self) -> usize {
        self.live.lock().len()
    }

    fn contains(&self, id: ConnectionId) -> bool {
        self.live.lock().contains_key(&id)
    }

    fn snapshot(&self) -> Vec<Connection> {
        // upgraded handles are dropped by the caller, outside the lock, since dropping
        // the last one deregisters
        self.live
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .map(Connection::from_shared)
            .collect()
    }

    fn shutdown(&self) {
        let connections = self.snapshot();

        #[cfg(feature = "logging")]
        if !connections.is_empty() {
            log::debug!("endpoint shutdown: {} live connections", connections.len());
        }

        for con in &connections {
            con.cancel();
        }
        self.live.lock().clear();
        drop(connections);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, State};

    #[test]
    fn test_role_is_fixed_to_client() {
        let endpoint = Endpoint::client();
        assert_eq!(endpoint.role(), Role::Client);
        assert_eq!(endpoint.role().to_string(), "client");
        assert!(!endpoint.is_secure());
        assert!(Endpoint::secure_client().is_secure());
    }

    #[test]
    fn test_acquire_plain() {
        let endpoint = Endpoint::client();
        let con = endpoint.acquire("ws://example.com/chat").unwrap();
        assert_eq!(con.state(), State::Created);
        assert!(!con.is_secure());
        assert_eq!(endpoint.len(), 1);
        assert!(endpoint.contains(con.id()));
    }

    #[test]
    fn test_acquire_secure_on_plain_endpoint() {
        let endpoint = Endpoint::client();
        let err = endpoint.acquire("wss://example.com/chat").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndpointNotSecure);
        assert!(endpoint.is_empty());
    }

    #[test]
    fn test_acquire_secure_on_secure_endpoint() {
        let endpoint = Endpoint::secure_client();
        let con = endpoint.acquire("wss://example.com/chat").unwrap();
        assert!(con.is_secure());
        assert_eq!(endpoint.len(), 1);
    }

    #[test]
    fn test_acquire_invalid_uri() {
        let endpoint = Endpoint::client();
        for raw in ["", "example.com", "ftp://example.com", "ws://", "ws://host:port/"] {
            let err = endpoint.acquire(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidUri, "{raw}");
        }
        assert!(endpoint.is_empty());
    }

    #[test]
    fn test_connection_limit() {
        let endpoint = Endpoint::client().with_options(Options::default().with_max_connections(2));
        let a = endpoint.acquire("ws://example.com/a").unwrap();
        let _b = endpoint.acquire("ws://example.com/b").unwrap();

        let err = endpoint.acquire("ws://example.com/c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionCreationFailed);
        assert_eq!(endpoint.len(), 2);

        a.cancel();
        assert_eq!(endpoint.len(), 1);
        assert!(endpoint.acquire("ws://example.com/c").is_ok());
    }

    #[test]
    fn test_dropping_handle_deregisters() {
        let endpoint = Endpoint::client();
        let con = endpoint.acquire("ws://example.com/chat").unwrap();
        let id = con.id();
        assert!(endpoint.contains(id));
        drop(con);
        assert!(!endpoint.contains(id));
        assert!(endpoint.is_empty());
    }

    #[test]
    fn test_connections_snapshot() {
        let endpoint = Endpoint::client();
        let a = endpoint.acquire("ws://example.com/a").unwrap();
        let b = endpoint.acquire("ws://example.com/b").unwrap();

        let mut ids: Vec<_> = endpoint.connections().iter().map(Connection::id).collect();
        ids.sort();
        let mut expected = vec![a.id(), b.id()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_shutdown_cancels_pending() {
        let endpoint = Endpoint::client();
        let con = endpoint.acquire("ws://example.com/chat").unwrap();
        endpoint.shutdown();

        assert!(endpoint.is_empty());
        assert_eq!(con.state(), State::Failed);
        assert_eq!(con.failure(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_drop_endpoint_cancels_pending() {
        let endpoint = Endpoint::client();
        let con = endpoint.acquire("ws://example.com/chat").unwrap();
        drop(endpoint);
        assert_eq!(con.failure(), Some(ErrorKind::Cancelled));

        // the registry is gone, dropping the handle must not panic
        drop(con);
    }
}
