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

//! Connection manager implementation
//!
//! The ConnectionManager is responsible for:
//! - Accepting transports and registering them as connections
//! - Starting each connection's read pump and heartbeat supervisor
//! - Routing inbound messages to the dispatcher
//! - Unicast, broadcast and administrative closes
//! - Graceful shutdown coordination

use crate::heartbeat::supervise;
use crate::registry::{BroadcastResult, ConnectionRegistry};
use crate::{
    CloseReason, Connection, ConnectionHandler, ConnectionId, ConnectionInfo, Dispatcher, Result,
    ServerConfig, ServerMetrics, ServiceError, Transport,
};
use bytes::Bytes;
use heartwire_codec::{Frame, FrameCodec, FrameKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Owns the registry and dispatcher and drives every connection's lifecycle
pub struct ConnectionManager<C: FrameCodec> {
    config: ServerConfig,
    codec: C,
    registry: Arc<ConnectionRegistry<C>>,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<dyn ConnectionHandler>,
    metrics: Arc<ServerMetrics>,
    tasks: TaskTracker,
    shutting_down: AtomicBool,
}

impl<C: FrameCodec> ConnectionManager<C> {
    /// Create a manager and start its dispatcher
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(
        config: ServerConfig,
        codec: C,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self> {
        config.validate().map_err(ServiceError::InvalidConfig)?;

        let metrics = Arc::new(ServerMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.worker_count,
            config.worker_queue_capacity,
            handler.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            config,
            codec,
            dispatcher,
            handler,
            metrics,
            tasks: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the server metrics
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// True once [`shutdown`](Self::shutdown) has started
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Accept a transport under `id`
    ///
    /// On success the connection is registered and active, `on_connect` has
    /// returned, and its read pump and heartbeat supervisor are running.
    pub async fn accept<T: Transport>(
        &self,
        transport: T,
        id: impl Into<ConnectionId>,
    ) -> Result<Arc<Connection<C>>> {
        self.register(transport, id.into()).await
    }

    /// Accept a transport after checking the peer's origin
    ///
    /// A missing or unlisted origin under an allow-list policy fails with
    /// `UpgradeFailed`.
    pub async fn accept_with_origin<T: Transport>(
        &self,
        transport: T,
        id: impl Into<ConnectionId>,
        origin: Option<&str>,
    ) -> Result<Arc<Connection<C>>> {
        if !self.config.origin_policy.allows(origin) {
            self.metrics.connection_rejected();
            warn!(origin = ?origin, "Origin rejected");
            return Err(ServiceError::UpgradeFailed(format!(
                "origin {} not allowed",
                origin.unwrap_or("<none>")
            )));
        }
        self.register(transport, id.into()).await
    }

    #[instrument(skip(self, transport), fields(connection_id = %id))]
    async fn register<T: Transport>(
        &self,
        mut transport: T,
        id: ConnectionId,
    ) -> Result<Arc<Connection<C>>> {
        if self.is_shutting_down() {
            self.metrics.connection_rejected();
            return Err(ServiceError::ShuttingDown);
        }
        if id.is_blank() {
            self.metrics.connection_rejected();
            return Err(ServiceError::EmptyId);
        }
        if let Err(e) = transport.prepare() {
            self.metrics.connection_rejected();
            return Err(ServiceError::UpgradeFailed(e.to_string()));
        }

        let (conn, reader) = Connection::new(
            id,
            transport,
            self.codec.clone(),
            &self.config,
            Arc::downgrade(&self.registry),
            self.handler.clone(),
            self.metrics.clone(),
            self.tasks.clone(),
        );

        if let Err(e) = self.registry.add(conn.clone()) {
            self.metrics.connection_rejected();
            debug!(error = %e, "Registration refused");
            return Err(e);
        }
        // Shutdown may have snapshotted the registry before the insert
        if self.is_shutting_down() {
            self.registry.remove_if_same(&conn);
            self.metrics.connection_rejected();
            return Err(ServiceError::ShuttingDown);
        }

        self.metrics.connection_opened();
        conn.activate();
        info!(peer_addr = ?conn.peer_addr(), "Connection accepted");

        conn.run_connect_hook().await;

        self.tasks
            .spawn(conn.clone().read_pump(reader, self.dispatcher.clone()));
        if let Some(interval) = self.config.heartbeat_interval {
            self.tasks.spawn(supervise(
                conn.clone(),
                interval,
                self.config.heartbeat_timeout,
            ));
        }

        Ok(conn)
    }

    /// Look up a live connection
    pub fn get(&self, id: &str) -> Option<Arc<Connection<C>>> {
        self.registry.get(id)
    }

    /// Number of registered connections
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Ids of all registered connections
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    /// Info snapshots of all registered connections
    pub fn connection_infos(&self) -> Vec<ConnectionInfo> {
        self.registry.infos()
    }

    /// Send a frame to one connection
    pub async fn send_to(&self, id: &str, frame: Frame) -> Result<()> {
        let conn = self
            .registry
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(ConnectionId::from(id)))?;
        conn.send(frame).await
    }

    /// Send a business message to one connection
    pub async fn send_message_to(
        &self,
        id: &str,
        kind: FrameKind,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send_to(id, Frame::message(kind, payload)).await
    }

    /// Send a business message to every registered connection
    ///
    /// Every connection is attempted. If any send fails the full tally is
    /// returned inside `ServiceError::Broadcast`.
    pub async fn broadcast(
        &self,
        kind: FrameKind,
        payload: impl Into<Bytes>,
    ) -> Result<BroadcastResult> {
        self.registry
            .broadcast(Frame::message(kind, payload))
            .await
            .into_result()
    }

    /// Forcibly close one connection
    #[instrument(skip(self))]
    pub async fn kick(&self, id: &str) -> Result<()> {
        let conn = self
            .registry
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(ConnectionId::from(id)))?;
        conn.close(CloseReason::Kicked).await;
        Ok(())
    }

    /// Close every registered connection with `Shutdown`
    ///
    /// Returns how many connections were attempted. Connections that are
    /// already closing are skipped by their own idempotent teardown.
    pub async fn close_all(&self) -> usize {
        let targets = self.registry.snapshot();
        let count = targets.len();
        futures::future::join_all(
            targets
                .iter()
                .map(|conn| conn.close(CloseReason::Shutdown)),
        )
        .await;
        debug!(count, "Closed all connections");
        count
    }

    /// Refuse new connections, close existing ones and drain the dispatcher
    ///
    /// Calling this more than once is harmless.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("Shutdown already in progress");
            return;
        }
        info!("Shutting down connection manager");

        let closed = self.close_all().await;
        self.dispatcher.shutdown(self.config.shutdown_timeout).await;

        self.tasks.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!("Connection tasks still running after shutdown timeout");
        }

        info!(closed, "Connection manager stopped");
    }
}

impl<C: FrameCodec> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.count())
            .field("dispatcher", &self.dispatcher)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::NoopHandler;
    use crate::{ConnectionState, OriginPolicy};
    use futures_util::{SinkExt, StreamExt};
    use heartwire_codec::PacketCodec;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    fn manager(config: ServerConfig) -> ConnectionManager<PacketCodec> {
        ConnectionManager::new(config, PacketCodec::new(), Arc::new(NoopHandler)).unwrap()
    }

    fn quiet_config() -> ServerConfig {
        ServerConfig::default()
            .without_heartbeat()
            .with_workers(2, 8)
    }

    fn peer(stream: DuplexStream) -> Framed<DuplexStream, PacketCodec> {
        Framed::new(stream, PacketCodec::new())
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = ConnectionManager::new(
            ServerConfig::default().with_max_connections(0),
            PacketCodec::new(),
            Arc::new(NoopHandler),
        );
        assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_accept_and_send() {
        let manager = manager(quiet_config());
        let (local, remote) = tokio::io::duplex(1024);
        let mut remote = peer(remote);

        let conn = manager.accept(local, "a").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(manager.count(), 1);

        manager
            .send_message_to("a", FrameKind::Text, "hello")
            .await
            .unwrap();
        assert_eq!(remote.next().await.unwrap().unwrap(), Frame::text("hello"));
    }

    #[tokio::test]
    async fn test_accept_rejects_blank_and_duplicate_ids() {
        let manager = manager(quiet_config());
        let (a, _pa) = tokio::io::duplex(64);
        let (b, _pb) = tokio::io::duplex(64);
        let (c, _pc) = tokio::io::duplex(64);

        assert!(matches!(
            manager.accept(a, "  ").await,
            Err(ServiceError::EmptyId)
        ));
        manager.accept(b, "x").await.unwrap();
        assert!(matches!(
            manager.accept(c, "x").await,
            Err(ServiceError::DuplicateId(_))
        ));
        assert_eq!(manager.count(), 1);
    }

    #[tokio::test]
    async fn test_origin_policy_enforced() {
        let manager = manager(
            quiet_config().with_origin_policy(OriginPolicy::allow_list(["https://ok.example"])),
        );
        let (a, _pa) = tokio::io::duplex(64);
        let (b, _pb) = tokio::io::duplex(64);

        let denied = manager
            .accept_with_origin(a, "a", Some("https://evil.example"))
            .await;
        assert!(matches!(denied, Err(ServiceError::UpgradeFailed(_))));
        manager
            .accept_with_origin(b, "b", Some("https://ok.example"))
            .await
            .unwrap();
        assert_eq!(manager.connection_ids(), vec![ConnectionId::from("b")]);
    }

    #[tokio::test]
    async fn test_kick_and_not_found() {
        let manager = manager(quiet_config());
        let (local, remote) = tokio::io::duplex(1024);
        let mut remote = peer(remote);
        let conn = manager.accept(local, "k").await.unwrap();

        manager.kick("k").await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(remote.next().await.unwrap().unwrap(), Frame::close("kicked"));
        assert!(matches!(
            manager.kick("k").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            manager.send_to("k", Frame::text("x")).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_frame_tears_down() {
        let manager = manager(quiet_config());
        let (local, remote) = tokio::io::duplex(1024);
        let mut remote = peer(remote);
        let conn = manager.accept(local, "p").await.unwrap();

        remote.send(Frame::close("bye")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), conn.closed())
            .await
            .unwrap();
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_connections() {
        let manager = manager(quiet_config());
        let (a, _pa) = tokio::io::duplex(64);
        let (b, _pb) = tokio::io::duplex(64);
        let conn = manager.accept(a, "a").await.unwrap();

        manager.shutdown().await;
        assert!(conn.is_closed());
        assert_eq!(manager.count(), 0);
        assert!(matches!(
            manager.accept(b, "b").await,
            Err(ServiceError::ShuttingDown)
        ));
        // Second call is a no-op
        manager.shutdown().await;
    }
}
