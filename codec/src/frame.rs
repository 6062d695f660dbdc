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

//! Frame model shared by every codec

use bytes::Bytes;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a business frame, passed through to message handlers untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text payload
    Text,
    /// Opaque binary payload
    Binary,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A single unit of traffic on a managed connection.
///
/// Heartbeat and close frames are protocol frames: they are consumed by the
/// connection itself and never reach business handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Business payload
    Message {
        /// Text or binary
        kind: FrameKind,
        /// Raw payload bytes
        payload: Bytes,
    },
    /// Liveness probe or probe response
    Heartbeat {
        /// Sender clock in milliseconds since the Unix epoch
        timestamp: u64,
    },
    /// Close notification sent before the transport is shut down
    Close {
        /// Human readable reason
        reason: String,
    },
}

impl Frame {
    /// Create a text message frame
    pub fn text(text: impl Into<String>) -> Self {
        Self::Message {
            kind: FrameKind::Text,
            payload: Bytes::from(text.into()),
        }
    }

    /// Create a binary message frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::Message {
            kind: FrameKind::Binary,
            payload: payload.into(),
        }
    }

    /// Create a message frame of the given kind
    pub fn message(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self::Message {
            kind,
            payload: payload.into(),
        }
    }

    /// Create a heartbeat stamped with the current wall clock
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: unix_millis(),
        }
    }

    /// Create a close frame
    pub fn close(reason: impl Into<String>) -> Self {
        Self::Close {
            reason: reason.into(),
        }
    }

    /// Whether this is a heartbeat frame
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }

    /// Whether this frame belongs to the protocol rather than the application
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Heartbeat { .. } | Self::Close { .. })
    }

    /// Number of payload bytes carried by the frame
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Message { payload, .. } => payload.len(),
            Self::Heartbeat { .. } => 8,
            Self::Close { reason } => reason.len(),
        }
    }
}

/// Milliseconds since the Unix epoch, saturating to zero if the clock is
/// before the epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(
            Frame::text("hi"),
            Frame::Message {
                kind: FrameKind::Text,
                payload: Bytes::from_static(b"hi"),
            }
        );
        assert_eq!(Frame::binary(vec![1u8, 2, 3]).payload_len(), 3);
        assert_eq!(Frame::close("bye").payload_len(), 3);
    }

    #[test]
    fn test_control_classification() {
        assert!(Frame::heartbeat().is_heartbeat());
        assert!(Frame::heartbeat().is_control());
        assert!(Frame::close("x").is_control());
        assert!(!Frame::close("x").is_heartbeat());
        assert!(!Frame::text("x").is_control());
    }

    #[test]
    fn test_heartbeat_timestamp_is_recent() {
        let before = unix_millis();
        let Frame::Heartbeat { timestamp } = Frame::heartbeat() else {
            panic!("expected heartbeat");
        };
        assert!(timestamp >= before);
    }
}
