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

//! A single managed peer session
//!
//! A [`Connection`] owns the write half of its transport behind an async
//! mutex, so concurrent senders never interleave frames. The read half is
//! handed to a dedicated read pump task. Teardown is idempotent: whichever
//! caller first moves the state out of `Active` performs it, and every other
//! caller returns immediately.

use crate::dispatcher::{Dispatcher, Job, panic_message};
use crate::registry::ConnectionRegistry;
use crate::{
    CloseReason, ConnectionHandler, ConnectionId, ConnectionInfo, ConnectionState, Result,
    ServerConfig, ServerMetrics, ServiceError, Transport,
};
use bytes::Bytes;
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use heartwire_codec::{CodecError, Frame, FrameCodec, FrameKind};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Framed read half handed to the read pump
pub(crate) type ConnectionReader<C> = FramedRead<BoxedReader, C>;

/// A managed connection
pub struct Connection<C: FrameCodec> {
    // Metadata
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    created_at: Instant,
    state: AtomicU8,
    last_activity: StdMutex<Instant>,

    // Write half; holding the lock is what serializes writes
    writer: Mutex<FramedWrite<BoxedWriter, C>>,
    write_timeout: Duration,
    read_timeout: Duration,
    activity_resets_heartbeat: bool,

    // Lifecycle signals
    cancel: CancellationToken,
    heartbeat_activity: Notify,
    connected: CancellationToken,
    closed: CancellationToken,

    // Owners
    registry: Weak<ConnectionRegistry<C>>,
    handler: Arc<dyn ConnectionHandler>,
    metrics: Arc<ServerMetrics>,
    tasks: TaskTracker,

    // Counters
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl<C: FrameCodec> Connection<C> {
    /// Wrap a prepared transport in the `Connecting` state
    ///
    /// Returns the connection together with the framed read half, which the
    /// caller passes to [`read_pump`](Self::read_pump) once the connection is
    /// registered and active.
    pub(crate) fn new<T: Transport>(
        id: ConnectionId,
        transport: T,
        codec: C,
        config: &ServerConfig,
        registry: Weak<ConnectionRegistry<C>>,
        handler: Arc<dyn ConnectionHandler>,
        metrics: Arc<ServerMetrics>,
        tasks: TaskTracker,
    ) -> (Arc<Self>, ConnectionReader<C>) {
        let peer_addr = transport.peer_addr();
        let (read_half, write_half) = tokio::io::split(transport);
        let read_half: BoxedReader = Box::new(read_half);
        let write_half: BoxedWriter = Box::new(write_half);

        let reader = FramedRead::with_capacity(read_half, codec.clone(), config.read_buffer_size);
        let mut writer = FramedWrite::new(write_half, codec);
        writer.set_backpressure_boundary(config.write_buffer_size);

        let now = Instant::now();
        let conn = Arc::new(Self {
            id,
            peer_addr,
            created_at: now,
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            last_activity: StdMutex::new(now),
            writer: Mutex::new(writer),
            write_timeout: config.write_timeout,
            read_timeout: config.read_timeout,
            activity_resets_heartbeat: config.activity_resets_heartbeat,
            cancel: CancellationToken::new(),
            heartbeat_activity: Notify::new(),
            connected: CancellationToken::new(),
            closed: CancellationToken::new(),
            registry,
            handler,
            metrics,
            tasks,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        });
        (conn, reader)
    }

    /// Get the connection ID
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the peer address, if the transport reported one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get when the connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get the time of the last successful read or write
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while the connection accepts sends
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// True once teardown has completed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until teardown has completed and `on_disconnect` has returned
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Get messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get a point-in-time snapshot of this connection
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            state: self.state(),
            peer_addr: self.peer_addr,
            created_at: self.created_at,
            last_activity: self.last_activity(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }

    /// Send a frame to the peer
    ///
    /// Fails with `ConnectionClosed` unless the connection is active. A
    /// payload the codec refuses to encode is returned as `Codec` and leaves
    /// the connection open. A write error or timeout closes the connection
    /// and is returned as `WriteFailed`.
    #[instrument(skip(self, frame), fields(connection_id = %self.id))]
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_active() {
            return Err(ServiceError::ConnectionClosed);
        }
        match self.write_frame(frame).await {
            Ok(()) => Ok(()),
            Err(err @ ServiceError::Codec(_)) => {
                debug!(error = %err, "Payload rejected by codec");
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "Send failed, closing connection");
                self.metrics.connection_error();
                self.close(CloseReason::WriteFailed(err.to_string())).await;
                Err(err)
            }
        }
    }

    /// Send a business message to the peer
    pub async fn send_message(&self, kind: FrameKind, payload: impl Into<Bytes>) -> Result<()> {
        self.send(Frame::message(kind, payload)).await
    }

    /// Write one frame under the writer lock without touching the lifecycle
    ///
    /// The whole operation, including waiting for the lock, is bounded by
    /// the write timeout.
    pub(crate) async fn write_frame(&self, frame: Frame) -> Result<()> {
        let len = frame.payload_len() as u64;
        let is_heartbeat = frame.is_heartbeat();
        let is_message = !frame.is_control();

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(frame).await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                self.touch();
                if is_message {
                    self.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    self.messages_sent.fetch_add(1, Ordering::Relaxed);
                    self.metrics.message_sent(len);
                } else if is_heartbeat {
                    self.metrics.heartbeat_sent();
                }
                trace!(connection_id = %self.id, bytes = len, "Frame written");
                Ok(())
            }
            Ok(Err(e)) if e.is_io() => Err(ServiceError::WriteFailed(e.to_string())),
            // Encoders validate before touching the buffer
            Ok(Err(e)) => Err(ServiceError::Codec(e)),
            Err(_) => {
                self.metrics.timeout_error();
                Err(ServiceError::WriteFailed(format!(
                    "write timed out after {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    /// Close the connection
    ///
    /// Only the first call performs teardown: it cancels the connection's
    /// tasks, sends a best-effort close frame, shuts the write half, removes
    /// the connection from its registry and fires `on_disconnect`. Later
    /// and concurrent calls return immediately.
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn close(&self, reason: CloseReason) {
        if !self.begin_close() {
            trace!("Close already in progress");
            return;
        }
        debug!(reason = %reason, "Closing connection");
        self.cancel.cancel();

        let farewell = async {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Frame::close(reason.to_string())).await {
                trace!(error = %e, "Close frame not delivered");
            }
            if let Err(e) = writer.close().await {
                trace!(error = %e, "Transport shutdown failed");
            }
        };
        if tokio::time::timeout(self.write_timeout, farewell).await.is_err() {
            debug!("Close frame timed out");
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(self);
        }
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        self.metrics.connection_closed(self.created_at.elapsed());
        if reason.is_timeout() {
            self.metrics.timeout_error();
        }

        info!(
            reason = %reason,
            duration = ?self.created_at.elapsed(),
            messages_received = self.messages_received(),
            messages_sent = self.messages_sent(),
            "Connection closed"
        );

        if self.connected.is_cancelled() {
            self.finish_close(reason).await;
        } else {
            // Closed from inside on_connect; the hook has to return first
            let handler = self.handler.clone();
            let id = self.id.clone();
            let connected = self.connected.clone();
            let closed = self.closed.clone();
            self.tasks.spawn(async move {
                connected.cancelled().await;
                notify_disconnect(handler.as_ref(), &id, &reason).await;
                closed.cancel();
            });
        }
    }

    async fn finish_close(&self, reason: CloseReason) {
        notify_disconnect(self.handler.as_ref(), &self.id, &reason).await;
        self.closed.cancel();
    }

    fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from `Connecting` to `Active`
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Run `on_connect` and release a teardown waiting on it
    pub(crate) async fn run_connect_hook(&self) {
        let outcome = AssertUnwindSafe(self.handler.on_connect(&self.id))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            self.metrics.handler_panic();
            error!(
                connection_id = %self.id,
                panic = panic_message(panic.as_ref()),
                "on_connect panicked"
            );
        }
        self.connected.cancel();
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn heartbeat_activity(&self) -> tokio::sync::futures::Notified<'_> {
        self.heartbeat_activity.notified()
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Read frames until the connection closes
    ///
    /// Business messages go to the dispatcher; heartbeat frames only feed
    /// the heartbeat supervisor.
    #[instrument(skip_all, fields(connection_id = %self.id))]
    pub(crate) async fn read_pump(
        self: Arc<Self>,
        mut reader: ConnectionReader<C>,
        dispatcher: Arc<Dispatcher>,
    ) {
        debug!("Read pump started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = tokio::time::timeout(self.read_timeout, reader.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    debug!(timeout = ?self.read_timeout, "Read timed out");
                    self.close(CloseReason::ReadTimeout).await;
                    break;
                }
                Ok(None) => {
                    self.close(CloseReason::PeerClosed).await;
                    break;
                }
                Ok(Some(Err(e))) => {
                    let reason = match e {
                        CodecError::Io(io) => {
                            self.metrics.connection_error();
                            CloseReason::ReadFailed(io.to_string())
                        }
                        other => {
                            self.metrics.protocol_error();
                            CloseReason::Protocol(other.to_string())
                        }
                    };
                    warn!(reason = %reason, "Read failed");
                    self.close(reason).await;
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            self.touch();
            match frame {
                Frame::Heartbeat { timestamp } => {
                    trace!(timestamp, "Heartbeat received");
                    self.heartbeat_activity.notify_one();
                }
                Frame::Close { reason } => {
                    debug!(reason = %reason, "Peer sent close");
                    self.close(CloseReason::PeerClosed).await;
                    break;
                }
                Frame::Message { kind, payload } => {
                    let len = payload.len() as u64;
                    self.bytes_received.fetch_add(len, Ordering::Relaxed);
                    self.messages_received.fetch_add(1, Ordering::Relaxed);
                    self.metrics.message_received(len);
                    if self.activity_resets_heartbeat {
                        self.heartbeat_activity.notify_one();
                    }

                    let job = Job::new(self.id.clone(), kind, payload);
                    let submitted = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        submitted = dispatcher.submit(job) => submitted,
                    };
                    if let Err(e) = submitted {
                        debug!(error = %e, "Dispatcher rejected message");
                        self.close(CloseReason::Shutdown).await;
                        break;
                    }
                }
            }
        }
        debug!("Read pump stopped");
    }
}

async fn notify_disconnect(
    handler: &dyn ConnectionHandler,
    id: &ConnectionId,
    reason: &CloseReason,
) {
    let outcome = AssertUnwindSafe(handler.on_disconnect(id, reason))
        .catch_unwind()
        .await;
    if let Err(panic) = outcome {
        error!(
            connection_id = %id,
            panic = panic_message(panic.as_ref()),
            "on_disconnect panicked"
        );
    }
}

impl<C: FrameCodec> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
