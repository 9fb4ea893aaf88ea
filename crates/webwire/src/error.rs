//! Transport error taxonomy.
//!
//! These errors circulate inside the connection driver; the application only
//! ever observes state transitions and payload callbacks. A transport or
//! protocol failure funnels into a disconnect notification, usage mistakes
//! are logged and dropped.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between `send()` and a delivered response.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure: connect refused, reset, unexpected EOF.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Hostname did not resolve to any endpoint.
    #[error("failed to resolve {host}")]
    Resolve { host: String },

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL scheme is not http, https, ws or wss.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The URL has no host component.
    #[error("url has no host")]
    MissingHost,

    /// Peer violated HTTP/1.1 framing.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// Peer violated WebSocket framing.
    #[error("frame error: {0}")]
    Frame(#[from] webwire_codec::FrameError),

    /// WebSocket upgrade was not accepted.
    #[error("upgrade rejected with status {status}")]
    UpgradeRejected { status: u16 },

    /// `Sec-WebSocket-Accept` did not match the handshake key.
    #[error("sec-websocket-accept mismatch")]
    AcceptMismatch,

    /// A request serialized to zero bytes.
    #[error("request is empty")]
    EmptyRequest,
}

impl Error {
    /// Whether this error is a protocol violation rather than a transport
    /// failure. Protocol violations additionally fire the error handler
    /// delegate before the disconnect notification.
    pub(crate) fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::MalformedResponse(_)
                | Error::Frame(_)
                | Error::UpgradeRejected { .. }
                | Error::AcceptMismatch
        )
    }
}
