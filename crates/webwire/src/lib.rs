//! # webwire
//!
//! Client-side HTTP/1.1 and WebSocket transport over plain TCP or TLS.
//!
//! The crate centers on three pieces:
//!
//! - [`WebClient`]: configures one request (URL, method, headers, body,
//!   delegates), drives it with [`send`](WebClient::send), and dispatches
//!   responses, frames and state changes to callbacks from its event pump.
//! - A per-connection **driver task** that owns the socket and walks the
//!   lifecycle: resolve, connect, optional TLS handshake, request emission,
//!   then chunked/identity response assembly or the WebSocket frame loop.
//! - [`ClientContext`]: shared configuration plus an origin-keyed pool of
//!   idle connections, so sequential requests to one origin reuse the
//!   kept-alive socket.
//!
//! Delegates run only inside [`WebClient::pump`] /
//! [`WebClient::poll_events`], serially, on the calling task; the I/O side
//! never invokes user code.
//!
//! ```no_run
//! use webwire::{ClientConfig, ClientContext};
//!
//! # async fn example() -> webwire::Result<()> {
//! let context = ClientContext::new(ClientConfig::default());
//! let mut client = context.client("http://example.com/status")?;
//! client.set_data_receiver(|response| {
//!     println!("{} {}", response.status_code, response.text());
//! });
//! client.send();
//! while client.pump().await { /* deliver callbacks */ }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod conn;
mod error;
mod h1;
mod headers;
pub mod metrics;
mod pool;
mod response;
mod transport;
mod url;

pub use webwire_codec::{CloseCode, Frame, FrameError, OpCode};

pub use crate::{
    client::{SocketState, WebClient},
    config::ClientConfig,
    error::{Error, Result},
    headers::Headers,
    pool::ClientContext,
    response::Response,
    url::Target,
};
