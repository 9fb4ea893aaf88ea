//! Incremental frame encoder/decoder.
//!
//! [`FrameCodec`] drains zero or more complete frames from a receive buffer
//! and serializes outbound frames, applying the client-side mask. Decoding
//! never consumes bytes until a whole frame (header and payload) is
//! available, so the unconsumed remainder always stays in the buffer.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::{Frame, OpCode, MAX_HEADER_SIZE},
    mask::apply_mask,
    FrameError,
};

/// Default cap on a single inbound frame payload.
const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame lengths above 2^63 - 1 cannot be represented in a frame header.
const WIRE_LENGTH_LIMIT: u64 = i64::MAX as u64;

/// RFC 6455 frame codec.
///
/// Client codecs mask every outbound frame with a fresh random key; server
/// codecs send frames unmasked. Either side unmasks inbound payloads when
/// the mask bit is set.
#[derive(Debug)]
pub struct FrameCodec {
    mask_outgoing: bool,
    max_payload: usize,
}

impl FrameCodec {
    /// Codec for the client side of a connection.
    pub fn client() -> Self {
        Self {
            mask_outgoing: true,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Codec for the server side of a connection.
    pub fn server() -> Self {
        Self {
            mask_outgoing: false,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Caps the accepted inbound payload size.
    #[must_use]
    pub fn with_max_payload(mut self, limit: usize) -> Self {
        self.max_payload = limit;
        self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0x80 != 0;
        if src[0] & 0x70 != 0 {
            return Err(FrameError::ReservedBitsNotZero);
        }
        let opcode = OpCode::try_from(src[0] & 0x0F)?;

        let masked = src[1] & 0x80 != 0;
        let length_code = src[1] & 0x7F;
        let length_bytes = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + length_bytes + if masked { 4 } else { 0 };
        if src.len() < header_len {
            return Ok(None);
        }

        // Peek the payload length without consuming the header yet.
        let payload_len = match length_bytes {
            0 => u64::from(length_code),
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            _ => u64::from_be_bytes(src[2..10].try_into().expect("eight length bytes")),
        };
        if payload_len > WIRE_LENGTH_LIMIT || payload_len > self.max_payload as u64 {
            return Err(FrameError::PayloadTooLarge(payload_len));
        }
        let payload_len = payload_len as usize;

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::ControlFrameFragmented);
            }
            if payload_len > 125 {
                return Err(FrameError::ControlFrameTooLarge);
            }
        }

        if src.len() < header_len + payload_len {
            src.reserve(header_len + payload_len - src.len());
            return Ok(None);
        }

        src.advance(2 + length_bytes);
        let mask = if masked {
            let key = [src[0], src[1], src[2], src[3]];
            src.advance(4);
            Some(key)
        } else {
            None
        };

        let mut payload = src.split_to(payload_len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame::new(fin, opcode, mask, payload.freeze())))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = frame.payload.len();
        if payload_len as u64 > WIRE_LENGTH_LIMIT {
            return Err(FrameError::PayloadTooLarge(payload_len as u64));
        }

        if self.mask_outgoing {
            frame.ensure_masked();
        }

        dst.reserve(MAX_HEADER_SIZE + payload_len);
        frame.put_header(dst);

        let payload_start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(key) = frame.mask {
            apply_mask(&mut dst[payload_start..], key);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::CloseCode;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).expect("decode") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn client_encode_server_decode_round_trip() {
        let mut client = FrameCodec::client();
        let mut server = FrameCodec::server();

        let mut wire = BytesMut::new();
        client.encode(Frame::text("hello"), &mut wire).unwrap();

        // Mask bit must be set on every client frame.
        assert_eq!(wire[1] & 0x80, 0x80);

        let frame = server.decode(&mut wire).unwrap().expect("complete frame");
        assert_eq!(frame.opcode(), OpCode::Text);
        assert_eq!(frame.into_payload().as_ref(), b"hello");
        assert!(wire.is_empty());
    }

    #[test]
    fn masked_payload_differs_on_the_wire() {
        let mut client = FrameCodec::client();
        let mut wire = BytesMut::new();
        client.encode(Frame::text("pong"), &mut wire).unwrap();

        let mask: [u8; 4] = wire[2..6].try_into().unwrap();
        let mut expected = b"pong".to_vec();
        apply_mask(&mut expected, mask);
        assert_eq!(&wire[..2], &[0x81, 0x84]);
        assert_eq!(&wire[6..], &expected[..]);
    }

    #[test]
    fn decode_incomplete_header_leaves_buffer_intact() {
        let mut codec = FrameCodec::client();
        let mut buf = BytesMut::from(&[0x81u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_incomplete_payload_leaves_buffer_intact() {
        let mut codec = FrameCodec::client();
        // Text frame announcing 5 bytes, only 3 present.
        let mut buf = BytesMut::from(&[0x81u8, 0x05, b'h', b'e', b'l'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(b"lo");
        let frame = codec.decode(&mut buf).unwrap().expect("frame");
        assert_eq!(frame.payload().as_ref(), b"hello");
    }

    #[test]
    fn decode_keeps_remainder_after_frame() {
        let mut codec = FrameCodec::client();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x81, 0x02, b'h', b'i']);
        buf.extend_from_slice(&[0x81, 0x03, b'y']); // partial second frame

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().as_ref(), b"hi");
        assert_eq!(&buf[..], &[0x81, 0x03, b'y']);
    }

    #[test]
    fn decode_rejects_reserved_bits() {
        let mut codec = FrameCodec::client();
        let mut buf = BytesMut::from(&[0xC1u8, 0x00][..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(FrameError::ReservedBitsNotZero)
        );
    }

    #[test]
    fn decode_rejects_undefined_opcode() {
        let mut codec = FrameCodec::client();
        let mut buf = BytesMut::from(&[0x83u8, 0x00][..]);
        assert_eq!(codec.decode(&mut buf), Err(FrameError::InvalidOpCode(0x3)));
    }

    #[test]
    fn decode_rejects_fragmented_control_frame() {
        let mut codec = FrameCodec::client();
        let mut buf = BytesMut::from(&[0x09u8, 0x00][..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(FrameError::ControlFrameFragmented)
        );
    }

    #[test]
    fn decode_enforces_payload_limit() {
        let mut codec = FrameCodec::client().with_max_payload(16);
        let mut buf = BytesMut::from(&[0x82u8, 0x11][..]);
        assert_eq!(codec.decode(&mut buf), Err(FrameError::PayloadTooLarge(17)));
    }

    #[test]
    fn decode_unmasks_inbound_payload() {
        let mut server = FrameCodec::server();
        let mut client = FrameCodec::client();

        let mut wire = BytesMut::new();
        client
            .encode(Frame::binary(Bytes::from_static(&[1, 2, 3, 4, 5])), &mut wire)
            .unwrap();
        let frame = server.decode(&mut wire).unwrap().expect("frame");
        assert_eq!(frame.payload().as_ref(), &[1, 2, 3, 4, 5]);
        assert!(frame.mask().is_some());
    }

    #[test]
    fn continuation_frames_pass_through() {
        let mut server = FrameCodec::server();
        let mut wire = BytesMut::new();
        server
            .encode(Frame::new(false, OpCode::Text, None, "par"), &mut wire)
            .unwrap();
        server
            .encode(Frame::new(true, OpCode::Continuation, None, "tial"), &mut wire)
            .unwrap();

        let mut reader = FrameCodec::client();
        let frames = decode_all(&mut reader, &mut wire);
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].is_fin());
        assert_eq!(frames[0].opcode(), OpCode::Text);
        assert!(frames[1].is_fin());
        assert_eq!(frames[1].opcode(), OpCode::Continuation);
        assert_eq!(frames[1].payload().as_ref(), b"tial");
    }

    #[test]
    fn sixteen_bit_length_round_trip() {
        let payload = vec![0x5au8; 300];
        let mut server = FrameCodec::server();
        let mut wire = BytesMut::new();
        server
            .encode(Frame::binary(payload.clone()), &mut wire)
            .unwrap();

        let mut client = FrameCodec::client();
        let frame = client.decode(&mut wire).unwrap().expect("frame");
        assert_eq!(frame.payload().as_ref(), &payload[..]);
    }

    #[test]
    fn close_frame_round_trip() {
        let mut server = FrameCodec::server();
        let mut wire = BytesMut::new();
        server
            .encode(Frame::close(CloseCode::Away, "going away"), &mut wire)
            .unwrap();

        let mut client = FrameCodec::client();
        let frame = client.decode(&mut wire).unwrap().expect("frame");
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(frame.close_code(), Some(CloseCode::Away));
        assert_eq!(frame.close_reason(), Some("going away"));
    }
}
