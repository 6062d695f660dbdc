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

//! Line-delimited JSON envelope codec for text transports
//!
//! Protocol frames travel as one JSON object per line:
//!
//! ```text
//! {"type":"heartbeat","timestamp":1718000000000}
//! {"type":"close","data":"server shutdown","timestamp":1718000000000}
//! ```
//!
//! Any other line, JSON or not, is a business text message and is passed
//! through verbatim.

use crate::{CodecError, Frame, FrameKind, unix_millis};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default envelope type marking heartbeat frames
pub const DEFAULT_HEARTBEAT_TYPE: &str = "heartbeat";

/// Envelope type marking close frames
pub const CLOSE_TYPE: &str = "close";

/// Default maximum line length in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: u64,
}

/// Newline-delimited codec recognising a JSON heartbeat envelope.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    lines: LinesCodec,
    heartbeat_type: String,
    max_line_length: usize,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCodec {
    /// Create a codec using the default heartbeat type and line limit
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom line limit
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
            heartbeat_type: DEFAULT_HEARTBEAT_TYPE.to_string(),
            max_line_length,
        }
    }

    /// Use a different envelope type for heartbeat frames
    pub fn with_heartbeat_type(mut self, heartbeat_type: impl Into<String>) -> Self {
        self.heartbeat_type = heartbeat_type.into();
        self
    }

    /// Envelope type marking heartbeat frames
    pub fn heartbeat_type(&self) -> &str {
        &self.heartbeat_type
    }

    fn classify(&self, line: String) -> Frame {
        if line.trim_start().starts_with('{') {
            if let Ok(envelope) = serde_json::from_str::<Envelope>(&line) {
                if envelope.kind == self.heartbeat_type {
                    return Frame::Heartbeat {
                        timestamp: envelope.timestamp,
                    };
                }
                if envelope.kind == CLOSE_TYPE {
                    let reason = match envelope.data {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    return Frame::Close { reason };
                }
            }
        }
        Frame::Message {
            kind: FrameKind::Text,
            payload: Bytes::from(line),
        }
    }

    fn map_lines_error(&self, err: LinesCodecError) -> CodecError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong(self.max_line_length),
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }

    fn put_envelope(&self, envelope: &Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut writer = (&mut *dst).writer();
        serde_json::to_writer(&mut writer, envelope)?;
        writer.into_inner().put_u8(b'\n');
        Ok(())
    }
}

impl Decoder for JsonCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.lines.decode(src) {
            Ok(Some(line)) => Ok(Some(self.classify(line))),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_lines_error(e)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.lines.decode_eof(src) {
            Ok(Some(line)) => Ok(Some(self.classify(line))),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_lines_error(e)),
        }
    }
}

impl Encoder<Frame> for JsonCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Message { payload, .. } => {
                let text = std::str::from_utf8(&payload).map_err(|_| CodecError::InvalidUtf8)?;
                if text.contains('\n') {
                    return Err(CodecError::EmbeddedNewline);
                }
                if text.len() > self.max_line_length {
                    return Err(CodecError::FrameTooLarge {
                        size: text.len(),
                        max: self.max_line_length,
                    });
                }
                dst.reserve(text.len() + 1);
                dst.put_slice(text.as_bytes());
                dst.put_u8(b'\n');
                Ok(())
            }
            Frame::Heartbeat { timestamp } => {
                let envelope = Envelope {
                    kind: self.heartbeat_type.clone(),
                    data: serde_json::Value::Null,
                    timestamp,
                };
                self.put_envelope(&envelope, dst)
            }
            Frame::Close { reason } => {
                let envelope = Envelope {
                    kind: CLOSE_TYPE.to_string(),
                    data: serde_json::Value::String(reason),
                    timestamp: unix_millis(),
                };
                self.put_envelope(&envelope, dst)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut JsonCodec, input: &str) -> Vec<Frame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decode_heartbeat_envelope() {
        let mut codec = JsonCodec::new();
        let frames = decode_all(&mut codec, "{\"type\":\"heartbeat\",\"timestamp\":42}\n");
        assert_eq!(frames, vec![Frame::Heartbeat { timestamp: 42 }]);
    }

    #[test]
    fn decode_custom_heartbeat_type() {
        let mut codec = JsonCodec::new().with_heartbeat_type("ping");
        let frames = decode_all(
            &mut codec,
            "{\"type\":\"ping\",\"timestamp\":7}\n{\"type\":\"heartbeat\"}\n",
        );
        assert_eq!(frames[0], Frame::Heartbeat { timestamp: 7 });
        assert_eq!(frames[1], Frame::text("{\"type\":\"heartbeat\"}"));
    }

    #[test]
    fn decode_business_json_is_passed_through() {
        let mut codec = JsonCodec::new();
        let line = "{\"type\":\"chat\",\"data\":{\"msg\":\"hi\"}}";
        let frames = decode_all(&mut codec, &format!("{line}\n"));
        assert_eq!(frames, vec![Frame::text(line)]);
    }

    #[test]
    fn decode_plain_text_line() {
        let mut codec = JsonCodec::new();
        let frames = decode_all(&mut codec, "hello world\r\nsecond\n");
        assert_eq!(frames, vec![Frame::text("hello world"), Frame::text("second")]);
    }

    #[test]
    fn decode_close_envelope() {
        let mut codec = JsonCodec::new();
        let frames = decode_all(&mut codec, "{\"type\":\"close\",\"data\":\"bye\"}\n");
        assert_eq!(frames, vec![Frame::close("bye")]);
    }

    #[test]
    fn decode_partial_line() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from("{\"type\":\"heart");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"beat\",\"timestamp\":1}\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Heartbeat { timestamp: 1 })
        );
    }

    #[test]
    fn decode_line_too_long() {
        let mut codec = JsonCodec::with_max_line_length(8);
        let mut buf = BytesMut::from("0123456789abcdef\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::LineTooLong(8))
        ));
    }

    #[test]
    fn encode_heartbeat_is_decodable() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::Heartbeat { timestamp: 99 }, &mut buf)
            .unwrap();
        assert!(buf.ends_with(b"\n"));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Heartbeat { timestamp: 99 })
        );
    }

    #[test]
    fn encode_rejects_embedded_newline() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Frame::text("a\nb"), &mut buf),
            Err(CodecError::EmbeddedNewline)
        ));
    }

    #[test]
    fn encode_rejects_non_utf8_binary() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Frame::binary(vec![0xFFu8, 0x00]), &mut buf),
            Err(CodecError::InvalidUtf8)
        ));
    }
}
