//! WebSocket frame model.
//!
//! A [`Frame`] is the smallest self-contained unit on the wire: FIN bit,
//! opcode, optional client-side mask and payload. Data frames carry
//! application bytes, control frames (close/ping/pong) manage the
//! connection. Fragmented messages arrive as a data frame with `fin ==
//! false` followed by continuation frames; this crate does not reassemble
//! them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{CloseCode, FrameError};

/// Largest possible frame header: 2 bytes fixed, 8 bytes extended length,
/// 4 bytes mask.
pub(crate) const MAX_HEADER_SIZE: usize = 14;

/// Frame type identifier (RFC 6455 section 11.8).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// Continues a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Arbitrary binary payload.
    Binary,
    /// Connection close, optionally carrying a status code and reason.
    Close,
    /// Liveness probe; the peer answers with a pong.
    Ping,
    /// Answer to a ping.
    Pong,
}

impl OpCode {
    /// Whether this opcode is a control frame (close, ping or pong).
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::InvalidOpCode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        match op {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: Bytes,
}

impl Frame {
    /// Builds a frame with explicit flags. Prefer the named constructors.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// A final text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// A final binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// A ping frame.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// A pong frame.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// A close frame carrying `code` and a UTF-8 reason.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(u16::from(code));
        payload.put_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, None, payload.freeze())
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Whether this frame completes a message.
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// The masking key, if the frame is masked.
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Status code of a close frame, if the payload carries one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let bytes: [u8; 2] = self.payload.get(0..2)?.try_into().ok()?;
        Some(CloseCode::from(u16::from_be_bytes(bytes)))
    }

    /// UTF-8 reason of a close frame, if present and valid.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Installs a fresh random mask unless one is already set.
    pub(crate) fn ensure_masked(&mut self) {
        if self.mask.is_none() {
            self.mask = Some(rand::random());
        }
    }

    /// Serializes the frame header into `dst`.
    pub(crate) fn put_header(&self, dst: &mut BytesMut) {
        let first = u8::from(self.fin) << 7 | u8::from(self.opcode);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();

        dst.put_u8(first);
        if len < 126 {
            dst.put_u8(len as u8 | mask_bit);
        } else if len < 65536 {
            dst.put_u8(126 | mask_bit);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127 | mask_bit);
            dst.put_u64(len as u64);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_byte_round_trip() {
        for raw in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            assert_eq!(u8::from(OpCode::try_from(raw).unwrap()), raw);
        }
    }

    #[test]
    fn rejects_reserved_opcodes() {
        for raw in [0x3u8, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert_eq!(OpCode::try_from(raw), Err(FrameError::InvalidOpCode(raw)));
        }
    }

    #[test]
    fn control_opcodes() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(!OpCode::Continuation.is_control());
    }

    #[test]
    fn close_frame_layout() {
        let frame = Frame::close(CloseCode::Normal, "bye");
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(&frame.payload()[..2], &1000u16.to_be_bytes());
        assert_eq!(frame.close_code(), Some(CloseCode::Normal));
        assert_eq!(frame.close_reason(), Some("bye"));
    }

    #[test]
    fn empty_close_frame_has_no_code() {
        let frame = Frame::new(true, OpCode::Close, None, Bytes::new());
        assert_eq!(frame.close_code(), None);
        assert_eq!(frame.close_reason(), None);
    }

    #[test]
    fn short_header_layout() {
        let frame = Frame::text("hi");
        let mut buf = BytesMut::new();
        frame.put_header(&mut buf);
        assert_eq!(&buf[..], &[0x81, 0x02]);
    }

    #[test]
    fn extended_16_bit_length() {
        let frame = Frame::binary(vec![0u8; 300]);
        let mut buf = BytesMut::new();
        frame.put_header(&mut buf);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);
    }

    #[test]
    fn extended_64_bit_length() {
        let frame = Frame::binary(vec![0u8; 70_000]);
        let mut buf = BytesMut::new();
        frame.put_header(&mut buf);
        assert_eq!(buf[1], 127);
        assert_eq!(
            u64::from_be_bytes(buf[2..10].try_into().unwrap()),
            70_000
        );
    }

    #[test]
    fn mask_bit_and_key_in_header() {
        let mut frame = Frame::text("pong");
        frame.mask = Some([1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        frame.put_header(&mut buf);
        assert_eq!(&buf[..], &[0x81, 0x84, 1, 2, 3, 4]);
    }
}
