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

//! # Heartwire Frame Codecs
//!
//! This crate defines the [`Frame`] model shared by every Heartwire connection
//! and the codecs that move frames on and off a transport. A codec is any
//! type implementing both `tokio_util::codec::Decoder<Item = Frame>` and
//! `Encoder<Frame>` with [`CodecError`] as the error type; the
//! [`FrameCodec`] marker trait is implemented for all of them automatically.
//!
//! Two codecs ship with the crate:
//!
//! - [`PacketCodec`]: tagged, length-prefixed binary frames for raw byte
//!   streams such as TCP.
//! - [`JsonCodec`]: one JSON envelope per line for text transports, with a
//!   configurable heartbeat `type`.
//!
//! Both reserve a frame type for heartbeats so that protocol probes are never
//! confused with business payloads.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use heartwire_codec::{Frame, PacketCodec};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8999").await?;
//! let mut framed = Framed::new(stream, PacketCodec::new());
//! framed.send(Frame::text("hello")).await?;
//! while let Some(frame) = framed.next().await {
//!     match frame? {
//!         Frame::Heartbeat { timestamp } => framed.send(Frame::Heartbeat { timestamp }).await?,
//!         other => println!("{:?}", other),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod frame;
mod json;
mod packet;
mod result;

pub use frame::{Frame, FrameKind, unix_millis};
pub use json::{CLOSE_TYPE, DEFAULT_HEARTBEAT_TYPE, DEFAULT_MAX_LINE_LENGTH, JsonCodec};
pub use packet::{
    DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, PacketCodec, TAG_BINARY, TAG_CLOSE, TAG_HEARTBEAT,
    TAG_TEXT,
};
pub use result::{CodecError, CodecResult};

use tokio_util::codec::{Decoder, Encoder};

/// A codec usable by a managed connection.
///
/// Each connection clones the codec once for its read half and once for its
/// write half, so codecs must be cheap to clone and hold no state that has to
/// be shared between directions.
pub trait FrameCodec:
    Decoder<Item = Frame, Error = CodecError>
    + Encoder<Frame, Error = CodecError>
    + Clone
    + Send
    + Sync
    + Unpin
    + 'static
{
}

impl<T> FrameCodec for T where
    T: Decoder<Item = Frame, Error = CodecError>
        + Encoder<Frame, Error = CodecError>
        + Clone
        + Send
        + Sync
        + Unpin
        + 'static
{
}
