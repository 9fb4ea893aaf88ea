//! WebSocket frame model and incremental codec per [RFC 6455].
//!
//! This crate is the lowest layer of the webwire stack: it turns raw bytes
//! into [`Frame`]s and frames back into bytes. It knows nothing about
//! connections, upgrades or message reassembly — continuation frames are
//! surfaced verbatim and left to the caller.
//!
//! The [`FrameCodec`] implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`], so it can either be wrapped in a
//! `Framed` stream or driven by hand against a `BytesMut` receive buffer.
//!
//! [RFC 6455]: https://datatracker.ietf.org/doc/html/rfc6455

mod close;
mod codec;
mod frame;
pub mod mask;

use thiserror::Error;

pub use crate::{
    close::CloseCode,
    codec::FrameCodec,
    frame::{Frame, OpCode},
};

/// Errors produced while encoding or decoding WebSocket frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Opcode outside the values defined by RFC 6455.
    #[error("invalid opcode: {0:#x}")]
    InvalidOpCode(u8),

    /// One of the RSV bits is set; no extensions are negotiated.
    #[error("reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Control frames must not be fragmented.
    #[error("fragmented control frame")]
    ControlFrameFragmented,

    /// Control frame payloads are limited to 125 bytes.
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    /// Payload length exceeds what a frame header can carry, or the
    /// configured receive limit.
    #[error("frame payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    /// I/O error surfaced by the underlying transport while the codec was
    /// reading from or writing to it.
    #[error("I/O error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.kind())
    }
}
