//! Transport collaborators.
//!
//! A [`Transport`] tells the endpoint whether it can provide secure sessions and opens
//! the raw byte stream for a validated [`Uri`]. The endpoint queries
//! [`Transport::is_secure_capable`] synchronously during acquisition and only calls
//! [`Transport::connect`] once a connection is started.

use std::{io, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName, pki_types::TrustAnchor},
    TlsConnector,
};

use crate::{stream::MaybeTlsStream, uri::Uri};

/// Opens byte streams to WebSocket servers.
pub trait Transport: Send + Sync + 'static {
    /// The stream handed to the opening handshake.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Whether `wss://` targets can be served.
    fn is_secure_capable(&self) -> bool;

    /// Connects to the host and port of `uri`.
    ///
    /// The returned future must not borrow from `self`: the connect orchestrator polls it
    /// on a spawned task.
    fn connect(&self, uri: &Uri) -> BoxFuture<'static, io::Result<Self::Stream>>;
}

/// Plain TCP transport. Cannot serve `wss://` targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn is_secure_capable(&self) -> bool {
        false
    }

    fn connect(&self, uri: &Uri) -> BoxFuture<'static, io::Result<TcpStream>> {
        let secure = uri.is_secure();
        let host = uri.host().to_owned();
        let port = uri.port();

        async move {
            if secure {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "tcp transport cannot open secure streams",
                ));
            }
            connect_tcp(&host, port).await
        }
        .boxed()
    }
}

/// TCP transport with TLS for `wss://` targets.
///
/// `ws://` targets still connect over plain TCP, so the same endpoint serves both schemes.
///
/// If the default TLS configuration cannot be built, plain targets still connect and
/// every secure connect fails with the configuration error.
#[derive(Clone)]
pub struct TlsTransport {
    connector: Result<TlsConnector, rustls::Error>,
}

impl TlsTransport {
    /// Creates a transport trusting the webpki root certificates.
    pub fn new() -> Self {
        let connector = tls_connector();
        #[cfg(feature = "logging")]
        if let Err(err) = &connector {
            log::warn!("default tls configuration unavailable: {err}");
        }
        Self { connector }
    }

    /// Creates a transport with a custom TLS connector.
    ///
    /// This allows for customized TLS settings such as custom certificate validation,
    /// client certificates, or specific cipher suites.
    pub fn with_connector(connector: TlsConnector) -> Self {
        Self {
            connector: Ok(connector),
        }
    }
}

impl Default for TlsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TlsTransport {
    type Stream = MaybeTlsStream;

    fn is_secure_capable(&self) -> bool {
        true
    }

    fn connect(&self, uri: &Uri) -> BoxFuture<'static, io::Result<MaybeTlsStream>> {
        let secure = uri.is_secure();
        let host = uri.host().to_owned();
        let port = uri.port();
        let connector = self.connector.clone();

        async move {
            let tcp_stream = connect_tcp(&host, port).await?;
            if !secure {
                return Ok(MaybeTlsStream::Plain(tcp_stream));
            }

            let connector = connector.map_err(io::Error::other)?;
            let domain = ServerName::try_from(host)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;
            let tls_stream = connector.connect(domain, tcp_stream).await?;
            Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
        }
        .boxed()
    }
}

async fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Creates a TLS connector with root certificates for secure WebSocket connections.
/// If the crypto provider hasn't been set, [*ring*](https://github.com/briansmith/ring) will be used.
///
/// # Errors
/// Fails if the crypto provider does not support the protocol versions in
/// `rustls::ALL_VERSIONS`.
pub fn tls_connector() -> Result<TlsConnector, rustls::Error> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
        subject: ta.subject.clone(),
        subject_public_key_info: ta.subject_public_key_info.clone(),
        name_constraints: ta.name_constraints.clone(),
    }));

    // define the provider if any, fallback to ring
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_capabilities() {
        assert!(!TcpTransport.is_secure_capable());
        assert!(TlsTransport::new().is_secure_capable());
    }

    #[tokio::test]
    async fn test_tcp_refuses_secure_uri() {
        let uri = Uri::parse("wss://127.0.0.1:1/").unwrap();
        let err = TcpTransport.connect(&uri).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_tcp_connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let uri = Uri::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();

        let (connected, accepted) = tokio::join!(TcpTransport.connect(&uri), listener.accept());
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }

    #[test]
    fn test_default_tls_connector() {
        assert!(tls_connector().is_ok());
        assert!(TlsTransport::new().connector.is_ok());
    }

    #[tokio::test]
    async fn test_tls_transport_plain_scheme() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let uri = Uri::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();

        let (connected, _) = tokio::join!(TlsTransport::new().connect(&uri), listener.accept());
        assert!(matches!(connected, Ok(MaybeTlsStream::Plain(_))));
    }
}
