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

//! Managed Connection Pool
//!
//! This crate manages a pool of long-lived, bidirectional connections over
//! any byte transport:
//!
//! - A concurrent registry keyed by caller-chosen ids
//! - Per-connection heartbeat supervision with a single liveness deadline
//! - Serialized writes with per-operation timeouts
//! - Inbound messages dispatched to a bounded worker pool, in order per
//!   connection, with handler panics contained
//! - Idempotent teardown that fires `on_disconnect` exactly once
//! - Lock-free metrics and monitoring
//!
//! # Architecture
//!
//! ```text
//! TcpServer (optional accept loop)
//!     ↓
//! ConnectionManager ─→ Dispatcher (workers → ConnectionHandler::on_message)
//!     ↓
//! ConnectionRegistry → Connection (read pump, heartbeat supervisor)
//! ```
//!
//! Framing is pluggable: any [`FrameCodec`](heartwire_codec::FrameCodec)
//! from `heartwire-codec` can be used, and any type implementing
//! [`Transport`] can be accepted.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use heartwire_codec::{FrameKind, PacketCodec};
//! use heartwire_service::{ConnectionHandler, ConnectionId, ConnectionManager, ServerConfig};
//! use std::sync::Arc;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl ConnectionHandler for MyHandler {
//!     async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
//!         println!("{}: {} bytes of {}", id, payload.len(), kind);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(
//!         ServerConfig::default(),
//!         PacketCodec::new(),
//!         Arc::new(MyHandler),
//!     )?;
//!
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//!     manager.accept(stream, "device-1").await?;
//!     manager.send_message_to("device-1", FrameKind::Text, "hello").await?;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod dispatcher;
mod error;
mod handler;
mod heartbeat;
mod manager;
mod metrics;
mod registry;
mod server;
mod transport;
mod types;

pub use config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT,
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, OriginPolicy, ServerConfig,
};
pub use connection::Connection;
pub use dispatcher::{Dispatcher, Job};
pub use error::{Result, ServiceError};
pub use handler::{
    CallbackHandler, ConnectCallback, ConnectionHandler, DisconnectCallback, LoggingHandler,
    MessageCallback,
};
pub use heartbeat::{HeartbeatPhase, HeartbeatState};
pub use manager::ConnectionManager;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::{BroadcastResult, ConnectionRegistry};
pub use server::TcpServer;
pub use transport::Transport;
pub use types::{CloseReason, ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot};
