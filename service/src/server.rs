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

//! TCP server implementation
//!
//! The TcpServer owns a listener and feeds accepted sockets to a
//! [`ConnectionManager`], assigning each one a `conn-<n>` id.

use crate::{
    ConnectionHandler, ConnectionId, ConnectionManager, Result, ServerConfig, ServerMetrics,
    ServerSnapshot, ServiceError,
};
use heartwire_codec::FrameCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP front end for a connection manager
///
/// # Example
///
/// ```no_run
/// use heartwire_codec::PacketCodec;
/// use heartwire_service::{LoggingHandler, ServerConfig, TcpServer};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new("127.0.0.1:8999".parse()?);
///     let server = TcpServer::new(config, PacketCodec::new(), Arc::new(LoggingHandler)).await?;
///
///     server.start().await?;
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///
///     Ok(())
/// }
/// ```
pub struct TcpServer<C: FrameCodec> {
    /// Connection manager
    manager: Arc<ConnectionManager<C>>,
    /// TCP listener shared with the accept loop
    listener: Arc<TcpListener>,
    /// Actual bind address
    bind_address: SocketAddr,
    /// Server start time
    started_at: Instant,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Shutdown notification
    shutdown_notify: Arc<Notify>,
    /// Accept loop task handle
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: FrameCodec> TcpServer<C> {
    /// Create a new server with the given configuration
    ///
    /// This binds to the configured address but does not start accepting
    /// connections. Call `start()` to begin accepting connections.
    pub async fn new(
        config: ServerConfig,
        codec: C,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self> {
        let manager = Arc::new(ConnectionManager::new(config, codec, handler)?);

        let listener = TcpListener::bind(manager.config().bind_address).await?;
        let bind_address = listener.local_addr()?;

        info!(%bind_address, "TCP server bound");

        Ok(Self {
            manager,
            listener: Arc::new(listener),
            bind_address,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            accept_handle: Mutex::new(None),
        })
    }

    /// Start accepting connections
    ///
    /// Fails with `AlreadyRunning` if the accept loop is already running and
    /// with `ShuttingDown` once the server has been shut down.
    pub async fn start(&self) -> Result<()> {
        if self.manager.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyRunning);
        }

        info!(bind_address = %self.bind_address, "Starting TCP server");

        let handle = self.spawn_accept_loop();
        *self.accept_handle.lock().await = Some(handle);

        Ok(())
    }

    fn spawn_accept_loop(&self) -> JoinHandle<()> {
        let listener = self.listener.clone();
        let manager = self.manager.clone();
        let running = self.running.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let next_id = AtomicU64::new(1);

        tokio::spawn(async move {
            let max_connections = manager.config().max_connections;
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let accept_result = tokio::select! {
                    result = listener.accept() => result,
                    _ = shutdown_notify.notified() => break,
                };

                match accept_result {
                    Ok((socket, peer_addr)) => {
                        debug!(%peer_addr, "Accepted TCP connection");

                        if manager.count() >= max_connections {
                            warn!(
                                %peer_addr,
                                max_connections,
                                "Connection limit reached, rejecting connection"
                            );
                            manager.metrics().connection_rejected();
                            drop(socket);
                            continue;
                        }

                        let id = ConnectionId::sequential(next_id.fetch_add(1, Ordering::Relaxed));
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.accept(socket, id.clone()).await {
                                warn!(connection_id = %id, %peer_addr, error = %e, "Failed to accept connection");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        manager.metrics().connection_error();

                        // Back off on errors to avoid tight loop
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }

            info!("Accept loop terminated");
        })
    }

    /// Shutdown the server gracefully
    ///
    /// Stops accepting, then closes every connection and drains the
    /// dispatcher. Fails with `ServerNotRunning` if the server was not
    /// started.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::ServerNotRunning);
        }

        info!("Shutting down TCP server");

        self.shutdown_notify.notify_waiters();
        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        self.manager.shutdown().await;

        info!("TCP server shutdown complete");

        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the server's bind address
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Get the number of registered connections
    pub fn connection_count(&self) -> usize {
        self.manager.count()
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.manager.count(),
            total_connections: self.manager.metrics().total_connections(),
            bind_address: self.bind_address,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.manager.metrics().clone()
    }

    /// Get the connection manager
    pub fn manager(&self) -> Arc<ConnectionManager<C>> {
        self.manager.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        self.manager.config()
    }
}

impl<C: FrameCodec> std::fmt::Debug for TcpServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("bind_address", &self.bind_address())
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl<C: FrameCodec> Drop for TcpServer<C> {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("TcpServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_notify.notify_waiters();
        }
    }
}
