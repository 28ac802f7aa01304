//! Length-prefixed frame codec for the session stream.
//!
//! Wire format: `u32 version LE | u32 opcode LE | u32 length LE | length bytes UTF-8`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Frame;
use crate::{ProtocolError, HEADER_LEN, MAX_FRAME_LEN, PROTOCOL_VERSION};

/// Codec for framing `Frame` values over a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the whole header before anything can be decided
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // A foreign version says nothing reliable about its length word
        let version = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let length = u32::from_le_bytes([src[8], src[9], src[10], src[11]]) as usize;

        if length > MAX_FRAME_LEN {
            tracing::warn!(length, max = MAX_FRAME_LEN, "codec: rejecting oversized frame");
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_LEN,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let version = src.get_u32_le();
        let opcode = src.get_u32_le();
        src.advance(4);

        let payload = src.split_to(length);
        let text = String::from_utf8(payload.to_vec())?;
        tracing::trace!(version, opcode, length, "codec: frame decoded");

        Ok(Some(Frame {
            version,
            opcode,
            text,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Stream ended part way through a frame
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.text.as_bytes();

        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_LEN,
            });
        }

        dst.reserve(item.wire_len());
        dst.put_u32_le(item.version);
        dst.put_u32_le(item.opcode);
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(payload);

        Ok(())
    }
}
