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

//! Lock-free metrics for managed connections
//!
//! Counters are kept twice: as atomics on [`ServerMetrics`] for in-process
//! snapshots, and as `metrics` crate instruments under the `heartwire.`
//! prefix for whatever recorder the application installs.

use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a view of all metrics
/// at a point in time.
#[derive(Debug)]
pub struct ServerMetrics {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,

    connection_errors: AtomicU64,
    protocol_errors: AtomicU64,
    timeout_errors: AtomicU64,
    heartbeats_sent: AtomicU64,
    handler_panics: AtomicU64,

    // Stored as nanoseconds
    total_connection_duration_ns: AtomicU64,

    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            timeout_errors: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            total_connection_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Connection tracking

    /// Record a new connection being registered
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.connections.total").increment(1);
        gauge!("heartwire.connections.active").increment(1.0);
    }

    /// Record a registered connection being torn down
    pub fn connection_closed(&self, duration: Duration) {
        // Saturating so a stray double call can never wrap the gauge
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        self.total_connection_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        gauge!("heartwire.connections.active").decrement(1.0);
        histogram!("heartwire.connection.duration").record(duration.as_secs_f64());
    }

    /// Record a connection refused before registration
    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.connections.rejected").increment(1);
    }

    /// Get the current number of active connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the total number of connections since server start
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    // Throughput tracking

    /// Record an outbound message of `bytes` payload bytes
    pub fn message_sent(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        counter!("heartwire.messages.sent").increment(1);
    }

    /// Record an inbound message of `bytes` payload bytes
    pub fn message_received(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        counter!("heartwire.messages.received").increment(1);
    }

    /// Record a heartbeat probe written to a peer
    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.heartbeats.sent").increment(1);
    }

    // Error tracking

    /// Record a transport error
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.errors.connection").increment(1);
    }

    /// Record a framing error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.errors.protocol").increment(1);
    }

    /// Record a read or heartbeat timeout
    pub fn timeout_error(&self) {
        self.timeout_errors.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.errors.timeout").increment(1);
    }

    /// Record a message handler that panicked
    pub fn handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
        counter!("heartwire.errors.handler_panic").increment(1);
    }

    // Snapshot

    /// Get a snapshot of all metrics
    ///
    /// The snapshot may not be perfectly consistent if metrics are being
    /// updated concurrently, but it will be close enough for monitoring
    /// purposes.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_connection_duration: self.average_connection_duration(),
        }
    }

    fn average_connection_duration(&self) -> Duration {
        let closed = self
            .total_connections
            .load(Ordering::Relaxed)
            .saturating_sub(self.active_connections.load(Ordering::Relaxed));
        if closed == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_connection_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / closed)
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total connections since server start
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections refused before registration
    pub rejected_connections: u64,
    /// Total payload bytes sent
    pub bytes_sent: u64,
    /// Total payload bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Total transport errors
    pub connection_errors: u64,
    /// Total framing errors
    pub protocol_errors: u64,
    /// Total read and heartbeat timeouts
    pub timeout_errors: u64,
    /// Heartbeat probes written
    pub heartbeats_sent: u64,
    /// Message handlers that panicked
    pub handler_panics: u64,
    /// Server uptime
    pub uptime: Duration,
    /// Average duration of closed connections
    pub avg_connection_duration: Duration,
}

impl MetricsSnapshot {
    /// Calculate messages per second (sent)
    pub fn messages_sent_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.messages_sent as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate messages per second (received)
    pub fn messages_received_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.messages_received as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.connection_errors + self.protocol_errors + self.timeout_errors
    }
}
