//! WebSocket URI validation.
//!
//! A [`Uri`] is parsed once from a string and is either fully valid or not constructed
//! at all. Only the `ws` and `wss` schemes are accepted; the secure flag follows from
//! the scheme.

use std::{fmt, str::FromStr};

use thiserror::Error;
use url::{Host, Url};

/// Default port for the `ws` scheme.
pub const WS_PORT: u16 = 80;

/// Default port for the `wss` scheme.
pub const WSS_PORT: u16 = 443;

/// Reasons a string is rejected as a WebSocket URI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    /// The scheme is neither `ws` nor `wss`.
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    /// The authority has no host component.
    #[error("missing host")]
    MissingHost,
    /// The port is not a number in the `0..=65535` range.
    #[error("invalid port")]
    InvalidPort,
    /// WebSocket URIs must not carry a fragment (RFC 6455, section 3).
    #[error("fragment identifiers are not allowed")]
    Fragment,
    /// The string does not follow the generic URI grammar.
    #[error(transparent)]
    Malformed(#[from] url::ParseError),
}

/// A validated `ws://` or `wss://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    url: Url,
    host: String,
    port: u16,
    secure: bool,
}

impl Uri {
    /// Parses and validates `raw`.
    ///
    /// # Errors
    /// Returns a [`UriError`] for an unrecognized scheme, a missing host, a malformed
    /// port, a fragment, or a string that is not a URI at all.
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let url = Url::parse(raw.trim()).map_err(|err| match err {
            url::ParseError::EmptyHost => UriError::MissingHost,
            url::ParseError::InvalidPort => UriError::InvalidPort,
            err => UriError::Malformed(err),
        })?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(UriError::UnsupportedScheme(other.to_owned())),
        };

        // url keeps IPv6 hosts bracketed in host_str, connect wants the bare address
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(UriError::MissingHost),
        };

        if url.fragment().is_some() {
            return Err(UriError::Fragment);
        }

        let port = url
            .port()
            .unwrap_or(if secure { WSS_PORT } else { WS_PORT });

        Ok(Self {
            url,
            host,
            port,
            secure,
        })
    }

    /// Whether the scheme is `wss`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The URI scheme, either `ws` or `wss`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host name or IP address, IPv6 addresses without brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, or the scheme default.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component, `/` when the URI has none.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// The request target sent in the opening handshake: path plus query.
    pub fn resource(&self) -> &str {
        &self.url[url::Position::BeforePath..url::Position::AfterQuery]
    }

    /// Value for the `Host` header. The port is only included when it was explicit.
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or(&self.host);
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// The underlying parsed [`Url`].
    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for Uri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.url, f)
    }
}
