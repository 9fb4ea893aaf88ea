//! Request targets and pool origin keys.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// A validated request target: one of `http`, `https`, `ws` or `wss`.
///
/// Wraps a parsed [`Url`] and exposes the handful of components the
/// transport needs. Two targets share a pool bucket iff their
/// [`origin_key`](Target::origin_key) strings are equal.
#[derive(Clone, Debug)]
pub struct Target {
    url: Url,
}

impl Target {
    /// Parses and validates a target URL.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(Error::MissingHost);
        }
        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().expect("validated at parse")
    }

    /// Port, falling back to the scheme default (80 for http/ws, 443 for
    /// https/wss).
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().expect("known scheme")
    }

    /// Path and query without the leading slash; the request line re-adds it.
    pub fn endpoint(&self) -> String {
        let mut endpoint = self.url.path().trim_start_matches('/').to_string();
        if let Some(query) = self.url.query() {
            endpoint.push('?');
            endpoint.push_str(query);
        }
        endpoint
    }

    /// Whether the connection must be wrapped in TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme(), "https" | "wss")
    }

    /// Whether the target selects the WebSocket upgrade path.
    pub fn is_websocket(&self) -> bool {
        matches!(self.scheme(), "ws" | "wss")
    }

    /// Stable pool-bucket identifier: `scheme.host.port`, lowercase.
    ///
    /// Scheme and host are already lowercased by the URL parser.
    pub fn origin_key(&self) -> String {
        format!("{}.{}.{}", self.scheme(), self.host(), self.port())
    }

    /// Whether a connection established for `self` can carry a request for
    /// `other`. Origin equality; callers treat the policy as opaque.
    pub fn can_reuse_for(&self, other: &Target) -> bool {
        self.origin_key() == other.origin_key()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}
