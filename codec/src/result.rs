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

//! Error types for frame encoding and decoding

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while turning transport bytes into frames or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading from or writing to the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the configured maximum size.
    #[error("Frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual size of the frame
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// A frame header carried a tag byte this codec does not know.
    #[error("Unknown frame tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// A text or close frame did not contain valid UTF-8.
    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8,

    /// A control frame payload was shorter or longer than its fixed layout.
    #[error("Malformed control frame (expected {expected} bytes, got {actual})")]
    Truncated {
        /// Number of bytes the frame layout requires
        expected: usize,
        /// Number of bytes present
        actual: usize,
    },

    /// The JSON envelope could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line-delimited frame exceeded the configured maximum length.
    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// A line-delimited message payload contained a line terminator.
    #[error("Message payload contains an embedded line terminator")]
    EmbeddedNewline,
}

impl CodecError {
    /// Check if the error came from the underlying stream rather than from
    /// malformed data
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}
