//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Tagged length-prefixed codec for raw byte-stream transports
//!
//! Every frame on the wire is a five byte header followed by the payload:
//!
//! ```text
//! +-----+-----------------+----------------------+
//! | tag | length (u32 BE) | payload (length)     |
//! +-----+-----------------+----------------------+
//! ```
//!
//! Heartbeat frames carry an eight byte big-endian millisecond timestamp;
//! close frames carry a UTF-8 reason.

use crate::{CodecError, Frame, FrameKind};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Size of the fixed frame header in bytes
pub const HEADER_LEN: usize = 5;

/// Default maximum payload size accepted or produced by [`PacketCodec`]
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Tag for UTF-8 text messages
pub const TAG_TEXT: u8 = 0x01;
/// Tag for binary messages
pub const TAG_BINARY: u8 = 0x02;
/// Tag for close notifications
pub const TAG_CLOSE: u8 = 0x08;
/// Tag reserved for heartbeat probes and responses
pub const TAG_HEARTBEAT: u8 = 0x09;

/// Length-prefixed codec with a reserved heartbeat tag.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use heartwire_codec::{Frame, PacketCodec};
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = PacketCodec::new();
/// let mut buf = BytesMut::new();
/// codec.encode(Frame::text("ping"), &mut buf).unwrap();
/// assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::text("ping")));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    /// Create a codec with the default maximum frame size
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum payload size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum payload size in bytes
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let tag = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        self.check_size(len)?;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        trace!(tag, len, "Decoded packet");

        match tag {
            TAG_TEXT => {
                std::str::from_utf8(&payload).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Some(Frame::Message {
                    kind: FrameKind::Text,
                    payload,
                }))
            }
            TAG_BINARY => Ok(Some(Frame::Message {
                kind: FrameKind::Binary,
                payload,
            })),
            TAG_HEARTBEAT => {
                if payload.len() != 8 {
                    return Err(CodecError::Truncated {
                        expected: 8,
                        actual: payload.len(),
                    });
                }
                let timestamp = (&payload[..]).get_u64();
                Ok(Some(Frame::Heartbeat { timestamp }))
            }
            TAG_CLOSE => {
                let reason =
                    String::from_utf8(payload.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Some(Frame::Close { reason }))
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl Encoder<Frame> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Message { kind, payload } => {
                self.check_size(payload.len())?;
                let tag = match kind {
                    FrameKind::Text => TAG_TEXT,
                    FrameKind::Binary => TAG_BINARY,
                };
                dst.reserve(HEADER_LEN + payload.len());
                dst.put_u8(tag);
                dst.put_u32(payload.len() as u32);
                dst.put_slice(&payload);
            }
            Frame::Heartbeat { timestamp } => {
                dst.reserve(HEADER_LEN + 8);
                dst.put_u8(TAG_HEARTBEAT);
                dst.put_u32(8);
                dst.put_u64(timestamp);
            }
            Frame::Close { reason } => {
                // Oversized reasons are cut on a char boundary rather than rejected
                let mut end = reason.len().min(self.max_frame_size);
                while !reason.is_char_boundary(end) {
                    end -= 1;
                }
                let reason = &reason.as_bytes()[..end];
                dst.reserve(HEADER_LEN + reason.len());
                dst.put_u8(TAG_CLOSE);
                dst.put_u32(reason.len() as u32);
                dst.put_slice(reason);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        PacketCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn encode_text_layout() {
        let buf = encode(Frame::text("abc"));
        assert_eq!(&buf[..], &[TAG_TEXT, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn encode_heartbeat_layout() {
        let buf = encode(Frame::Heartbeat { timestamp: 0x0102 });
        assert_eq!(
            &buf[..],
            &[TAG_HEARTBEAT, 0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0x01, 0x02]
        );
    }

    #[test]
    fn decode_waits_for_header() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[TAG_TEXT, 0, 0][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_waits_for_payload() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[TAG_BINARY, 0, 0, 0, 4, 1, 2][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[3, 4]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::binary(Bytes::from_static(&[1, 2, 3, 4])))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_two_frames_in_one_buffer() {
        let mut codec = PacketCodec::new();
        let mut buf = encode(Frame::text("one"));
        buf.extend_from_slice(&encode(Frame::close("done")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::text("one")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::close("done")));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut codec = PacketCodec::with_max_frame_size(16);
        let mut buf = BytesMut::from(&[TAG_BINARY, 0, 0, 0, 17][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[0x42, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::UnknownTag(0x42))
        ));
    }

    #[test]
    fn decode_rejects_invalid_text() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[TAG_TEXT, 0, 0, 0, 2, 0xFF, 0xFE][..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::InvalidUtf8)));
    }

    #[test]
    fn decode_rejects_short_heartbeat() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[TAG_HEARTBEAT, 0, 0, 0, 2, 0, 1][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Truncated {
                expected: 8,
                actual: 2
            })
        ));
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let mut codec = PacketCodec::with_max_frame_size(4);
        let mut buf = BytesMut::new();
        assert!(codec.encode(Frame::text("too long"), &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_truncates_long_close_reason() {
        let mut codec = PacketCodec::with_max_frame_size(4);
        let mut buf = BytesMut::new();
        codec.encode(Frame::close("héllo"), &mut buf).unwrap();
        // 'h' + two byte 'é' + 'l' fits exactly
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::close("hél"))
        );
    }
}
