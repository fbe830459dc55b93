//! Wire codec for termgate messages.
//!
//! Format: 4-byte little-endian length prefix + bincode-encoded Message.
//! Partial input decodes to `Ok(None)` and leaves the buffer untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::{Error, Result};
use crate::protocol::Message;

/// Length of the frame header (4 bytes, little-endian u32).
pub const FRAME_HEADER_LEN: usize = 4;

/// Codec for length-prefixed bincode encoding of messages.
pub struct Codec;

impl Codec {
    /// Encode a message to bytes with length prefix.
    pub fn encode(msg: &Message) -> Result<Bytes> {
        let payload = bincode::serialize(msg).map_err(|e| Error::Codec {
            message: format!("serialization failed: {}", e),
        })?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Codec {
                message: format!(
                    "message too large: {} bytes (max {})",
                    payload.len(),
                    MAX_MESSAGE_SIZE
                ),
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decode one message from the front of `buf`.
    ///
    /// The buffer is only consumed on a successful decode.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        // Reject before waiting for the rest of an oversized frame
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::Codec {
                message: format!(
                    "message length {} exceeds maximum {}",
                    len, MAX_MESSAGE_SIZE
                ),
            });
        }

        if buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        let payload = buf.split_to(len);
        let msg = bincode::deserialize(&payload).map_err(|e| Error::Codec {
            message: format!("deserialization failed: {}", e),
        })?;

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Geometry, OpenPayload};

    #[test]
    fn decode_partial_returns_none() {
        let msg = Message::Resize(Geometry::new(120, 40));
        let encoded = Codec::encode(&msg).unwrap();

        let mut buf = BytesMut::from(&encoded[..encoded.len() / 2]);
        let before = buf.len();
        assert!(Codec::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn decode_empty_returns_none() {
        assert!(Codec::decode(&mut BytesMut::new()).unwrap().is_none());
    }

    #[test]
    fn decode_length_too_large_returns_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le((MAX_MESSAGE_SIZE + 1) as u32);
        buf.put_slice(&[0u8; 16]);

        let err = Codec::decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn decode_invalid_payload_returns_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(10);
        buf.put_slice(&[0xFF; 10]);

        let err = Codec::decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn encode_rejects_oversized_data() {
        let msg = Message::data(vec![0u8; MAX_MESSAGE_SIZE + 1]);
        assert!(matches!(Codec::encode(&msg), Err(Error::Codec { .. })));
    }

    #[test]
    fn interleaved_frames_decode_in_order() {
        let frames = [
            Message::Open(OpenPayload {
                term_type: "xterm".into(),
                geometry: Geometry::new(80, 24),
                env: vec![],
            }),
            Message::data("ls\n"),
            Message::Resize(Geometry::with_pixels(100, 40, 800, 320)),
            Message::Eof,
        ];

        let mut buf = BytesMut::new();
        for frame in &frames {
            buf.extend_from_slice(&Codec::encode(frame).unwrap());
        }

        for expected in &frames {
            let decoded = Codec::decode(&mut buf).unwrap().unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(buf.is_empty());
    }
}
