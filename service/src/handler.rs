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

//! Lifecycle hooks for managed connections

use crate::{CloseReason, ConnectionId};
use async_trait::async_trait;
use bytes::Bytes;
use heartwire_codec::FrameKind;
use tracing::info;

/// Connection lifecycle handler
///
/// Implement this trait to observe connections owned by a
/// [`ConnectionManager`](crate::ConnectionManager). All methods are async and
/// have default implementations that do nothing. The handler is fixed when
/// the manager is built and shared by every connection.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use heartwire_codec::FrameKind;
/// use heartwire_service::{CloseReason, ConnectionHandler, ConnectionId};
///
/// struct MyHandler;
///
/// #[async_trait]
/// impl ConnectionHandler for MyHandler {
///     async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
///         println!("{} sent {} bytes of {}", id, payload.len(), kind);
///     }
///
///     async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
///         println!("{} left: {}", id, reason);
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called once a connection is registered and active
    ///
    /// Inbound messages are not dispatched until this method returns.
    async fn on_connect(&self, _id: &ConnectionId) {}

    /// Called on a dispatcher worker for every inbound business message
    ///
    /// Messages from one connection arrive in order. A panic here is
    /// contained to the message that caused it.
    async fn on_message(&self, _id: &ConnectionId, _kind: FrameKind, _payload: Bytes) {}

    /// Called exactly once after a connection has been torn down and
    /// removed from the registry
    async fn on_disconnect(&self, _id: &ConnectionId, _reason: &CloseReason) {}
}

/// Handler that only logs lifecycle events
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl ConnectionHandler for LoggingHandler {
    async fn on_connect(&self, id: &ConnectionId) {
        info!(connection_id = %id, "Connected");
    }

    async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
        info!(connection_id = %id, kind = %kind, len = payload.len(), "Received message");
    }

    async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
        info!(connection_id = %id, reason = %reason, "Disconnected");
    }
}

/// Callback for connection establishment
pub type ConnectCallback = Box<dyn Fn(&ConnectionId) + Send + Sync + 'static>;
/// Callback for inbound messages
pub type MessageCallback = Box<dyn Fn(&ConnectionId, FrameKind, Bytes) + Send + Sync + 'static>;
/// Callback for teardown
pub type DisconnectCallback = Box<dyn Fn(&ConnectionId, &CloseReason) + Send + Sync + 'static>;

/// Callback-based handler implementation
///
/// This provides a flexible way to implement handlers using closures instead
/// of implementing the `ConnectionHandler` trait.
///
/// # Example
///
/// ```no_run
/// use heartwire_service::CallbackHandler;
/// use std::sync::Arc;
///
/// let handler = Arc::new(CallbackHandler {
///     on_connect: Some(Box::new(|id| {
///         println!("Connection {} established", id);
///     })),
///     on_message: Some(Box::new(|id, _kind, payload| {
///         println!("Connection {} sent {:?}", id, payload);
///     })),
///     ..Default::default()
/// });
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    /// Called on connection establishment
    pub on_connect: Option<ConnectCallback>,
    /// Called for each inbound message
    pub on_message: Option<MessageCallback>,
    /// Called on disconnection
    pub on_disconnect: Option<DisconnectCallback>,
}

#[async_trait]
impl ConnectionHandler for CallbackHandler {
    async fn on_connect(&self, id: &ConnectionId) {
        if let Some(ref f) = self.on_connect {
            f(id);
        }
    }

    async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
        if let Some(ref f) = self.on_message {
            f(id, kind, payload);
        }
    }

    async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
        if let Some(ref f) = self.on_disconnect {
            f(id, reason);
        }
    }
}
