//! Opening handshake collaborators.
//!
//! The connect orchestrator decides *when* the handshake starts and what happens with its
//! outcome; a [`Handshake`] implementation owns the bytes on the wire. [`HyperHandshake`]
//! performs the RFC 6455 HTTP/1.1 upgrade using hyper.

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use http_body_util::Empty;
use hyper::{
    header::{self, HeaderMap, HeaderValue},
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{stream::HttpStream, uri::Uri};

/// GUID appended to the client key when computing `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reasons an opening handshake fails.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The server answered with something other than `101 Switching Protocols`.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header is missing or is not "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header is missing or does not contain "upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// "Sec-WebSocket-Accept" does not match the key that was sent.
    #[error("Invalid Sec-WebSocket-Accept")]
    InvalidAcceptKey,

    /// The server selected a subprotocol the client never offered.
    #[error("Server selected unrequested subprotocol `{0}`")]
    InvalidSubprotocol(String),

    /// The request could not be built from the connection's headers.
    #[error("Invalid request header: {0}")]
    InvalidHeader(String),

    /// The response did not arrive within the configured handshake timeout.
    #[error("Handshake timed out")]
    Timeout,

    /// Wraps errors from the hyper HTTP library during the upgrade exchange.
    #[error(transparent)]
    Http(#[from] hyper::Error),
}

/// Everything the handshake needs to build the upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// The validated target.
    pub uri: Uri,
    /// Extra headers configured on the connection before it was started.
    pub headers: HeaderMap,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in preference order.
    pub subprotocols: Vec<String>,
}

/// Result of a successful opening handshake.
#[derive(Debug)]
pub struct Established {
    /// The upgraded byte stream.
    pub stream: HttpStream,
    /// Subprotocol selected by the server, if any.
    pub subprotocol: Option<String>,
}

/// Performs the opening handshake over a freshly connected stream `S`.
pub trait Handshake<S>: Send + Sync + 'static {
    /// Sends the upgrade request over `io` and validates the response.
    ///
    /// Like [`Transport::connect`](crate::transport::Transport::connect), the returned
    /// future must be `'static`.
    fn handshake(
        &self,
        request: HandshakeRequest,
        io: S,
    ) -> BoxFuture<'static, Result<Established, HandshakeError>>;
}

/// HTTP/1.1 upgrade handshake driven by hyper.
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperHandshake;

impl<S> Handshake<S> for HyperHandshake
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn handshake(
        &self,
        request: HandshakeRequest,
        io: S,
    ) -> BoxFuture<'static, Result<Established, HandshakeError>> {
        client_handshake(request, io).boxed()
    }
}

async fn client_handshake<S>(request: HandshakeRequest, io: S) -> Result<Established, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let key = generate_key();
    let req = build_request(&request, &key)?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

    tokio::spawn(async move {
        if let Err(_err) = conn.with_upgrades().await {
            #[cfg(feature = "logging")]
            log::error!("upgrading connection: {:?}", _err);
        }
    });

    let mut response = sender.send_request(req).await?;
    let subprotocol = verify(&response, &key, &request.subprotocols)?;

    let upgraded = hyper::upgrade::on(&mut response).await?;

    Ok(Established {
        stream: HttpStream::from(TokioIo::new(upgraded)),
        subprotocol,
    })
}

fn build_request(request: &HandshakeRequest, key: &str) -> Result<Request<Empty<Bytes>>, HandshakeError> {
    let mut req = Request::builder()
        .method(Method::GET)
        .uri(request.uri.resource())
        .body(Empty::<Bytes>::new())
        .map_err(invalid_header)?;

    let headers = req.headers_mut();
    headers.extend(request.headers.clone());

    // allow the user to set a custom Host header.
    if !headers.contains_key(header::HOST) {
        let host = HeaderValue::from_str(&request.uri.host_header()).map_err(invalid_header)?;
        headers.insert(header::HOST, host);
    }

    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(
        header::SEC_WEBSOCKET_KEY,
        HeaderValue::from_str(key).map_err(invalid_header)?,
    );
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));

    if !request.subprotocols.is_empty() {
        let offered = HeaderValue::from_str(&request.subprotocols.join(", "))
            .map_err(invalid_header)?;
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
    }

    Ok(req)
}

fn invalid_header(err: impl std::fmt::Display) -> HandshakeError {
    HandshakeError::InvalidHeader(err.to_string())
}

/// Validates the server's upgrade response, returning the selected subprotocol.
fn verify<B>(
    response: &Response<B>,
    key: &str,
    offered: &[String],
) -> Result<Option<String>, HandshakeError> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HandshakeError::InvalidStatusCode(
            response.status().as_u16(),
        ));
    }

    let headers = response.headers();

    if !headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(HandshakeError::InvalidUpgradeHeader);
    }

    if !headers
        .get(header::CONNECTION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false)
    {
        return Err(HandshakeError::InvalidConnectionHeader);
    }

    let expected = sec_websocket_accept(key.as_bytes());
    if !headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .map(|h| h.as_bytes() == expected.as_bytes())
        .unwrap_or(false)
    {
        return Err(HandshakeError::InvalidAcceptKey);
    }

    let selected = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.trim().to_owned());

    match selected {
        Some(protocol) if !offered.iter().any(|p| *p == protocol) => {
            Err(HandshakeError::InvalidSubprotocol(protocol))
        }
        selected => Ok(selected),
    }
}

fn generate_key() -> String {
    use base64::prelude::*;
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Computes the `Sec-WebSocket-Accept` value the server must answer `key` with.
pub fn sec_websocket_accept(key: &[u8]) -> String {
    use base64::prelude::*;
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(ACCEPT_GUID);
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_response() -> hyper::http::response::Builder {
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, sec_websocket_accept(KEY.as_bytes()))
    }

    #[test]
    fn test_accept_key() {
        // RFC 6455, section 1.3
        assert_eq!(
            sec_websocket_accept(KEY.as_bytes()),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        use base64::prelude::*;
        let key = generate_key();
        assert_eq!(BASE64_STANDARD.decode(key).unwrap().len(), 16);
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn test_verify_accepts_valid_response() {
        let response = upgrade_response().body(()).unwrap();
        assert!(matches!(verify(&response, KEY, &[]), Ok(None)));
    }

    #[test]
    fn test_verify_status() {
        let response = Response::builder().status(403).body(()).unwrap();
        assert!(matches!(
            verify(&response, KEY, &[]),
            Err(HandshakeError::InvalidStatusCode(403))
        ));
    }

    #[test]
    fn test_verify_headers() {
        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "upgrade")
            .body(())
            .unwrap();
        assert!(matches!(
            verify(&response, KEY, &[]),
            Err(HandshakeError::InvalidUpgradeHeader)
        ));

        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "keep-alive")
            .body(())
            .unwrap();
        assert!(matches!(
            verify(&response, KEY, &[]),
            Err(HandshakeError::InvalidConnectionHeader)
        ));

        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, "bogus")
            .body(())
            .unwrap();
        assert!(matches!(
            verify(&response, KEY, &[]),
            Err(HandshakeError::InvalidAcceptKey)
        ));
    }

    #[test]
    fn test_verify_subprotocol() {
        let offered = vec!["chat".to_owned(), "superchat".to_owned()];

        let response = upgrade_response()
            .header(header::SEC_WEBSOCKET_PROTOCOL, "superchat")
            .body(())
            .unwrap();
        assert_eq!(
            verify(&response, KEY, &offered).unwrap(),
            Some("superchat".to_owned())
        );

        let response = upgrade_response()
            .header(header::SEC_WEBSOCKET_PROTOCOL, "mqtt")
            .body(())
            .unwrap();
        assert!(matches!(
            verify(&response, KEY, &offered),
            Err(HandshakeError::InvalidSubprotocol(p)) if p == "mqtt"
        ));
    }

    #[test]
    fn test_build_request() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer token123"));
        let request = HandshakeRequest {
            uri: Uri::parse("ws://example.com:8080/chat?room=1").unwrap(),
            headers,
            subprotocols: vec!["chat".into(), "superchat".into()],
        };

        let req = build_request(&request, KEY).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri(), "/chat?room=1");

        let headers = req.headers();
        assert_eq!(headers[header::HOST], "example.com:8080");
        assert_eq!(headers[header::UPGRADE], "websocket");
        assert_eq!(headers[header::CONNECTION], "upgrade");
        assert_eq!(headers[header::SEC_WEBSOCKET_KEY], KEY);
        assert_eq!(headers[header::SEC_WEBSOCKET_VERSION], "13");
        assert_eq!(headers[header::SEC_WEBSOCKET_PROTOCOL], "chat, superchat");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer token123");
    }

    #[test]
    fn test_build_request_keeps_custom_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("custom-host.example.com"));
        let request = HandshakeRequest {
            uri: Uri::parse("ws://10.0.0.1/").unwrap(),
            headers,
            subprotocols: Vec::new(),
        };

        let req = build_request(&request, KEY).unwrap();
        assert_eq!(req.headers()[header::HOST], "custom-host.example.com");
        assert!(!req.headers().contains_key(header::SEC_WEBSOCKET_PROTOCOL));
    }
}
