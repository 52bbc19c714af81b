//! The connect orchestrator: transport connect, then opening handshake, then exactly one
//! completion.

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use hyper::header::{HeaderValue, USER_AGENT};
use tokio::{runtime::Handle, sync::oneshot};

use crate::{
    connection::Connection,
    endpoint::Registry,
    handshake::{Handshake, HandshakeError},
    options::Options,
    transport::Transport,
    Result, WebSocketError,
};

/// Future returned by [`Endpoint::start`](crate::Endpoint::start).
///
/// Resolves exactly once with the open [`Connection`] or the error that ended the
/// attempt. The attempt itself runs on a spawned task, so dropping this future does not
/// cancel it.
#[must_use = "the outcome of the connect attempt is only observable through this future"]
pub struct ConnectFuture {
    inner: Outcome,
}

enum Outcome {
    /// The connection could not be started; resolves immediately.
    Rejected(Option<WebSocketError>),
    Pending(oneshot::Receiver<Result<Connection>>),
}

impl ConnectFuture {
    fn rejected(err: WebSocketError) -> Self {
        Self {
            inner: Outcome::Rejected(Some(err)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<Connection>>) -> Self {
        Self {
            inner: Outcome::Pending(rx),
        }
    }
}

impl Future for ConnectFuture {
    type Output = Result<Connection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Outcome::Rejected(err) => {
                Poll::Ready(Err(err.take().unwrap_or(WebSocketError::AlreadyTerminal)))
            }
            // the sender is only dropped undelivered if the driver task was torn down
            // together with the connection, which counts as a cancellation
            Outcome::Pending(rx) => Poll::Ready(
                ready!(rx.poll_unpin(cx)).unwrap_or(Err(WebSocketError::Cancelled)),
            ),
        }
    }
}

pub(crate) fn start<T, H>(
    transport: &Arc<T>,
    handshake: &Arc<H>,
    options: &Options,
    registry: &Arc<Registry>,
    con: &Connection,
) -> ConnectFuture
where
    T: Transport,
    H: Handshake<T::Stream>,
{
    // preconditions leave the connection untouched
    if !con.is_bound_to(registry) {
        return reject(con, WebSocketError::ForeignConnection);
    }
    if con.is_secure() && !transport.is_secure_capable() {
        return reject(con, WebSocketError::EndpointNotSecure);
    }
    let user_agent = match options.user_agent.as_deref().map(HeaderValue::from_str) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(err)) => {
            return reject(con, WebSocketError::InvalidHeader(format!("user-agent: {err}")))
        }
    };
    let Ok(runtime) = Handle::try_current() else {
        return reject(
            con,
            WebSocketError::ConnectionCreationFailed("no tokio runtime to drive the connection".into()),
        );
    };

    let (tx, rx) = oneshot::channel();
    if let Err(err) = con.begin(tx) {
        return reject(con, err);
    }

    let connect = transport.connect(con.uri());
    runtime.spawn(drive(
        con.clone(),
        connect,
        Arc::clone(handshake),
        options.connect_timeout,
        options.handshake_timeout,
        user_agent,
    ));

    ConnectFuture::pending(rx)
}

fn reject(con: &Connection, err: WebSocketError) -> ConnectFuture {
    #[cfg(feature = "logging")]
    log::warn!(
        "connection {} cannot start in state {:?}: {}",
        con.id(),
        con.state(),
        err
    );
    #[cfg(not(feature = "logging"))]
    let _ = con;
    ConnectFuture::rejected(err)
}

/// Runs one connect attempt to a terminal state.
///
/// Every exit path ends in [`Connection::open`] or [`Connection::fail`], which deliver the
/// completion. Exits on cancellation deliver nothing: [`Connection::cancel`] already did.
async fn drive<S, H>(
    con: Connection,
    connect: BoxFuture<'static, io::Result<S>>,
    handshake: Arc<H>,
    connect_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    user_agent: Option<HeaderValue>,
) where
    S: Send + 'static,
    H: Handshake<S>,
{
    let _guard = AbandonOnDrop(con.clone());
    let cancel = con.cancellation();

    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        res = within(connect_timeout, connect) => res,
    };

    let io = match connected {
        Some(Ok(io)) => io,
        Some(Err(err)) => {
            con.fail(WebSocketError::TransportConnectFailed(err));
            return;
        }
        None => {
            let err = io::Error::new(io::ErrorKind::TimedOut, "transport connect timed out");
            con.fail(WebSocketError::TransportConnectFailed(err));
            return;
        }
    };

    let Some(mut request) = con.handshake_pending() else {
        return;
    };

    if let Some(agent) = user_agent {
        request.headers.entry(USER_AGENT).or_insert(agent);
    }

    let handshaken = tokio::select! {
        _ = cancel.cancelled() => return,
        res = within(handshake_timeout, handshake.handshake(request, io)) => res,
    };

    match handshaken {
        Some(Ok(established)) => {
            con.open(established);
        }
        Some(Err(err)) => {
            con.fail(WebSocketError::HandshakeRejected(err));
        }
        None => {
            con.fail(WebSocketError::HandshakeRejected(HandshakeError::Timeout));
        }
    }
}

/// Awaits `fut`, giving up after `timeout` if one is set.
async fn within<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Fails the connection if the driver task goes away before reaching a terminal state,
/// e.g. when the runtime shuts down.
struct AbandonOnDrop(Connection);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if !self.0.state().is_terminal() {
            self.0.fail(WebSocketError::Cancelled);
        }
    }
}
