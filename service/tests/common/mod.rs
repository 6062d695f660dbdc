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

//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use heartwire_codec::{FrameKind, PacketCodec};
use heartwire_service::{
    CloseReason, ConnectionHandler, ConnectionId, ConnectionManager, ServerConfig, Transport,
};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Notify, mpsc};

/// Lifecycle event seen by [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(ConnectionId),
    ConnectReturned(ConnectionId),
    Message(ConnectionId, FrameKind, Bytes),
    Disconnect(ConnectionId, CloseReason),
}

/// Forwards every hook invocation to a channel
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ConnectionHandler for RecordingHandler {
    async fn on_connect(&self, id: &ConnectionId) {
        let _ = self.tx.send(Event::Connect(id.clone()));
    }

    async fn on_message(&self, id: &ConnectionId, kind: FrameKind, payload: Bytes) {
        if payload.as_ref() == b"panic" {
            panic!("handler asked to panic");
        }
        let _ = self.tx.send(Event::Message(id.clone(), kind, payload));
    }

    async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
        let _ = self.tx.send(Event::Disconnect(id.clone(), reason.clone()));
    }
}

/// Holds every `on_connect` open until [`release`](Self::release) is called
pub struct GatedHandler {
    tx: mpsc::UnboundedSender<Event>,
    gate: Notify,
}

impl GatedHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Self {
            tx,
            gate: Notify::new(),
        };
        (Arc::new(handler), rx)
    }

    /// Let one pending or future `on_connect` return
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ConnectionHandler for GatedHandler {
    async fn on_connect(&self, id: &ConnectionId) {
        let _ = self.tx.send(Event::Connect(id.clone()));
        self.gate.notified().await;
        let _ = self.tx.send(Event::ConnectReturned(id.clone()));
    }

    async fn on_disconnect(&self, id: &ConnectionId, reason: &CloseReason) {
        let _ = self.tx.send(Event::Disconnect(id.clone(), reason.clone()));
    }
}

/// A transport whose writes always fail and whose reads never complete
pub struct DeadTransport;

impl AsyncRead for DeadTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for DeadTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "dead transport")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Transport for DeadTransport {}

/// A transport that refuses to be prepared
pub struct UnpreparableTransport(pub tokio::io::DuplexStream);

impl AsyncRead for UnpreparableTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnpreparableTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Transport for UnpreparableTransport {
    fn prepare(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "handshake refused"))
    }
}

/// Configuration with heartbeats off and a read timeout no test will hit
pub fn quiet_config() -> ServerConfig {
    ServerConfig::default()
        .without_heartbeat()
        .with_read_timeout(Duration::from_secs(3600))
        .with_workers(4, 16)
}

pub fn manager(
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
) -> ConnectionManager<PacketCodec> {
    ConnectionManager::new(config, PacketCodec::new(), handler).expect("valid config")
}

/// Receive the next event or fail after five seconds
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler dropped")
}
