//! Connection objects and their lifecycle state.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::Registry,
    handshake::{Established, HandshakeRequest},
    stream::HttpStream,
    uri::Uri,
    ErrorKind, Result, WebSocketError,
};

/// Single-fire channel carrying the outcome of a connect sequence.
pub(crate) type Completion = oneshot::Sender<Result<Connection>>;

/// Process-unique identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a [`Connection`].
///
/// Transitions are strictly ordered:
/// `Created -> Connecting -> {HandshakePending | Failed} -> {Open | Failed}`.
/// [`State::Open`] and [`State::Failed`] are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Acquired from an endpoint, not started yet. Configuration is still allowed.
    Created,
    /// The transport connect is in flight.
    Connecting,
    /// The transport is up and the opening handshake is in flight.
    HandshakePending,
    /// The opening handshake succeeded.
    Open,
    /// The attempt failed or was cancelled.
    Failed,
}

impl State {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Open | Self::Failed)
    }
}

/// One logical WebSocket session, from acquisition until it is open or has failed.
///
/// `Connection` is a cheap, cloneable handle. The endpoint that created it keeps a
/// non-owning entry in its registry; the session itself lives as long as any handle
/// does. Dropping the last handle removes the registry entry.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    id: ConnectionId,
    uri: Uri,
    cancel: CancellationToken,
    registry: Weak<Registry>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: State,
    headers: HeaderMap,
    subprotocols: Vec<String>,
    completion: Option<Completion>,
    stream: Option<HttpStream>,
    subprotocol: Option<String>,
    failure: Option<ErrorKind>,
}

impl Connection {
    pub(crate) fn new(uri: Uri, registry: Weak<Registry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::next(),
                uri,
                cancel: CancellationToken::new(),
                registry,
                inner: Mutex::new(Inner {
                    state: State::Created,
                    headers: HeaderMap::new(),
                    subprotocols: Vec::new(),
                    completion: None,
                    stream: None,
                    subprotocol: None,
                    failure: None,
                }),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Whether this connection was acquired from the endpoint owning `registry`.
    pub(crate) fn is_bound_to(&self, registry: &Arc<Registry>) -> bool {
        std::ptr::eq(self.shared.registry.as_ptr(), Arc::as_ptr(registry))
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    /// The identity under which the endpoint registered this connection.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// The validated target.
    pub fn uri(&self) -> &Uri {
        &self.shared.uri
    }

    /// Whether the session requires a secure transport.
    pub fn is_secure(&self) -> bool {
        self.shared.uri.is_secure()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Why the connection failed, once it is [`State::Failed`].
    pub fn failure(&self) -> Option<ErrorKind> {
        self.shared.inner.lock().failure
    }

    /// Subprotocol selected by the server, once the connection is [`State::Open`].
    pub fn subprotocol(&self) -> Option<String> {
        self.shared.inner.lock().subprotocol.clone()
    }

    /// Moves the upgraded byte stream out of an open connection.
    ///
    /// Returns `None` before the connection is open or when the stream was already taken.
    pub fn take_stream(&self) -> Option<HttpStream> {
        self.shared.inner.lock().stream.take()
    }

    /// Sets a header on the opening handshake request, replacing any previous value.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidHeader`] if `name` or `value` is not valid HTTP.
    /// - [`WebSocketError::AlreadyTerminal`] if the connection was already started.
    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| WebSocketError::InvalidHeader(format!("{name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| WebSocketError::InvalidHeader(format!("{name}: {err}")))?;

        let mut inner = self.configurable()?;
        inner.headers.insert(name, value);
        Ok(())
    }

    /// Offers `protocol` in the `Sec-WebSocket-Protocol` request header.
    ///
    /// Protocols are offered in the order they are added.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidHeader`] if `protocol` is not an HTTP token.
    /// - [`WebSocketError::AlreadyTerminal`] if the connection was already started.
    pub fn add_subprotocol(&self, protocol: &str) -> Result<()> {
        if protocol.is_empty() || !protocol.bytes().all(is_token_char) {
            return Err(WebSocketError::InvalidHeader(format!(
                "invalid subprotocol `{protocol}`"
            )));
        }

        let mut inner = self.configurable()?;
        inner.subprotocols.push(protocol.to_owned());
        Ok(())
    }

    /// Abandons a connect attempt in progress.
    ///
    /// A non-terminal connection fails with [`WebSocketError::Cancelled`], leaves the
    /// registry, and ignores any later transport or handshake completion. Calling this on
    /// a terminal connection does nothing.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.shared.cancel.cancel();
        self.fail(WebSocketError::Cancelled);
    }

    fn configurable(&self) -> Result<parking_lot::MutexGuard<'_, Inner>> {
        let inner = self.shared.inner.lock();
        if inner.state != State::Created {
            return Err(WebSocketError::AlreadyTerminal);
        }
        Ok(inner)
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// `Created -> Connecting`, storing where the outcome must be delivered.
    pub(crate) fn begin(&self, completion: Completion) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Created {
            return Err(WebSocketError::AlreadyTerminal);
        }
        inner.completion = Some(completion);
        self.transition(&mut inner, State::Connecting);
        Ok(())
    }

    /// `Connecting -> HandshakePending`, snapshotting the request configuration.
    /// Returns `None` if the connection moved on in the meantime, e.g. it was cancelled.
    pub(crate) fn handshake_pending(&self) -> Option<HandshakeRequest> {
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Connecting {
            return None;
        }
        self.transition(&mut inner, State::HandshakePending);
        Some(HandshakeRequest {
            uri: self.shared.uri.clone(),
            headers: inner.headers.clone(),
            subprotocols: inner.subprotocols.clone(),
        })
    }

    /// `HandshakePending -> Open`, delivering the connection to the waiting caller.
    pub(crate) fn open(&self, established: Established) -> bool {
        let completion = {
            let mut inner = self.shared.inner.lock();
            if inner.state != State::HandshakePending {
                self.ignored(inner.state);
                return false;
            }
            inner.stream = Some(established.stream);
            inner.subprotocol = established.subprotocol;
            self.transition(&mut inner, State::Open);
            inner.completion.take()
        };

        if let Some(completion) = completion {
            let _ = completion.send(Ok(self.clone()));
        }
        true
    }

    /// Moves a non-terminal connection to `Failed`, deregisters it and delivers `err`.
    pub(crate) fn fail(&self, err: WebSocketError) -> bool {
        let completion = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_terminal() {
                self.ignored(inner.state);
                return false;
            }
            inner.failure = Some(err.kind());
            self.transition(&mut inner, State::Failed);
            inner.completion.take()
        };

        #[cfg(feature = "logging")]
        log::debug!("connection {} failed: {}", self.shared.id, err);

        self.shared.deregister();

        if let Some(completion) = completion {
            let _ = completion.send(Err(err));
        }
        true
    }

    fn transition(&self, inner: &mut Inner, to: State) {
        #[cfg(feature = "logging")]
        log::debug!(
            "connection {} ({}): {:?} -> {:?}",
            self.shared.id,
            self.shared.uri,
            inner.state,
            to
        );
        inner.state = to;
    }

    fn ignored(&self, _state: State) {
        #[cfg(feature = "logging")]
        log::debug!(
            "connection {}: ignoring completion in state {:?} ({})",
            self.shared.id,
            _state,
            ErrorKind::AlreadyTerminal
        );
    }
}

impl Shared {
    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("uri", &self.shared.uri.as_url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// RFC 7230 `tchar`.
fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection::new(Uri::parse("ws://example.com/chat").unwrap(), Weak::new())
    }

    fn established() -> Established {
        let (io, _) = tokio::io::duplex(64);
        Established {
            stream: HttpStream::other(io),
            subprotocol: Some("chat".into()),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = connection();
        let b = connection();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!State::Created.is_terminal());
        assert!(!State::Connecting.is_terminal());
        assert!(!State::HandshakePending.is_terminal());
        assert!(State::Open.is_terminal());
        assert!(State::Failed.is_terminal());
    }

    #[test]
    fn test_configure_only_while_created() {
        let con = connection();
        con.set_header("Authorization", "Bearer token").unwrap();
        con.add_subprotocol("chat").unwrap();

        let (tx, _rx) = oneshot::channel();
        con.begin(tx).unwrap();

        assert!(matches!(
            con.set_header("X-Late", "1"),
            Err(WebSocketError::AlreadyTerminal)
        ));
        assert!(matches!(
            con.add_subprotocol("late"),
            Err(WebSocketError::AlreadyTerminal)
        ));
    }

    #[test]
    fn test_invalid_configuration() {
        let con = connection();
        assert!(matches!(
            con.set_header("bad header", "1"),
            Err(WebSocketError::InvalidHeader(_))
        ));
        assert!(matches!(
            con.set_header("X-Ok", "line\nbreak"),
            Err(WebSocketError::InvalidHeader(_))
        ));
        assert!(matches!(
            con.add_subprotocol("two words"),
            Err(WebSocketError::InvalidHeader(_))
        ));
        assert!(matches!(
            con.add_subprotocol(""),
            Err(WebSocketError::InvalidHeader(_))
        ));
        assert_eq!(con.state(), State::Created);
    }

    #[test]
    fn test_begin_only_once() {
        let con = connection();
        let (tx, _rx) = oneshot::channel();
        con.begin(tx).unwrap();
        assert_eq!(con.state(), State::Connecting);

        let (tx, _rx) = oneshot::channel();
        assert!(matches!(con.begin(tx), Err(WebSocketError::AlreadyTerminal)));
    }

    #[test]
    fn test_success_path_delivers_once() {
        let con = connection();
        con.add_subprotocol("chat").unwrap();
        let (tx, mut rx) = oneshot::channel();
        con.begin(tx).unwrap();

        let request = con.handshake_pending().unwrap();
        assert_eq!(request.subprotocols, vec!["chat".to_owned()]);
        assert_eq!(con.state(), State::HandshakePending);

        assert!(con.open(established()));
        assert_eq!(con.state(), State::Open);
        assert_eq!(con.subprotocol().as_deref(), Some("chat"));

        let delivered = rx.try_recv().unwrap().unwrap();
        assert_eq!(delivered.id(), con.id());

        // duplicate completions are ignored
        assert!(!con.open(established()));
        assert!(!con.fail(WebSocketError::AlreadyTerminal));
        assert_eq!(con.state(), State::Open);

        assert!(con.take_stream().is_some());
        assert!(con.take_stream().is_none());
    }

    #[test]
    fn test_failure_path_delivers_once() {
        let con = connection();
        let (tx, mut rx) = oneshot::channel();
        con.begin(tx).unwrap();

        let err = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(con.fail(WebSocketError::TransportConnectFailed(err)));
        assert_eq!(con.state(), State::Failed);
        assert_eq!(con.failure(), Some(ErrorKind::TransportConnectFailed));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(WebSocketError::TransportConnectFailed(_))
        ));

        assert!(con.handshake_pending().is_none());
        assert!(!con.open(established()));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let con = connection();
        let (tx, mut rx) = oneshot::channel();
        con.begin(tx).unwrap();

        con.cancel();
        assert!(con.cancellation().is_cancelled());
        assert_eq!(con.failure(), Some(ErrorKind::Cancelled));
        assert!(matches!(rx.try_recv().unwrap(), Err(WebSocketError::Cancelled)));

        con.cancel();
        assert_eq!(con.state(), State::Failed);
        assert_eq!(con.failure(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_cancel_before_start() {
        let con = connection();
        con.cancel();
        assert_eq!(con.state(), State::Failed);

        let (tx, _rx) = oneshot::channel();
        assert!(matches!(con.begin(tx), Err(WebSocketError::AlreadyTerminal)));
    }
}
