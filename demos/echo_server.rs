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

//! Echo Server Example
//!
//! This example runs a line-oriented JSON echo server that:
//! - Accepts connections on port 8999
//! - Sends a heartbeat probe every 10 seconds and drops peers that stay
//!   silent for 30 seconds after a probe
//! - Echoes every message back to its sender
//! - Broadcasts a line to everyone when a client sends `{"type":"shout",...}`
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Connect with the bundled client, or with netcat and answer probes by
//! hand:
//! ```bash
//! cargo run --example heartbeat_client
//! nc localhost 8999
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use heartwire_codec::{FrameKind, JsonCodec};
use heartwire_service::{
    CloseReason, ConnectionHandler, ConnectionId, ServerConfig, ServiceError, TcpServer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Work the handler cannot do itself because it does not own the manager
enum Reply {
    Echo(ConnectionId, FrameKind, Bytes),
    Shout(Bytes),
    Kick(ConnectionId),
}

struct EchoHandler {
    replies: mpsc::UnboundedSender<Reply>,
}

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn on_connect(&self, id: &ConnectionId) {
        tracing::info!("Client {} connected", id);
    }

    async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
        let text = String::from_utf8_lossy(&payload);
        let reply = if text.trim() == "quit" {
            Reply::Kick(id.clone())
        } else if text.contains("\"type\":\"shout\"") {
            Reply::Shout(payload)
        } else {
            Reply::Echo(id.clone(), kind, payload)
        };
        let _ = self.replies.send(reply);
    }

    async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
        tracing::info!("Client {} disconnected: {}", id, reason);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    println!("Starting Heartwire Echo Server on 127.0.0.1:8999");
    println!("Press Ctrl+C to stop the server\n");

    let config = ServerConfig::new("127.0.0.1:8999".parse()?)
        .with_max_connections(100)
        .with_heartbeat(Duration::from_secs(10), Duration::from_secs(30))
        .with_workers(4, 64);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(EchoHandler { replies: tx });
    let server = TcpServer::new(config, JsonCodec::new(), handler).await?;
    server.start().await?;

    let manager = server.manager();
    let responder = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let result = match reply {
                Reply::Echo(id, kind, payload) => {
                    manager.send_message_to(&id, kind, payload).await
                }
                Reply::Shout(payload) => manager
                    .broadcast(FrameKind::Text, payload)
                    .await
                    .map(|_| ()),
                Reply::Kick(id) => manager.kick(&id).await,
            };
            match result {
                Ok(()) => {}
                Err(ServiceError::Broadcast(result)) => {
                    tracing::warn!("Broadcast reached {}", result)
                }
                Err(e) => tracing::warn!("Reply failed: {}", e),
            }
        }
    });

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down server...");

    server.shutdown().await?;
    responder.abort();
    println!("Server stopped");

    Ok(())
}
