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

//! Core types for managed connections

use std::borrow::Borrow;
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque connection identifier, unique within one registry.
///
/// Identifiers are supplied by the caller (a user id, a device id) or
/// generated by the server as `conn-<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Create the server generated identifier for sequence number `n`
    pub fn sequential(n: u64) -> Self {
        Self(Arc::from(format!("conn-{}", n)))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the identifier is empty or only whitespace
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for ConnectionId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&String> for ConnectionId {
    fn from(id: &String) -> Self {
        Self::new(id)
    }
}

/// Connection state (stored as atomic u8 for lock-free state management)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport accepted, registration in progress
    Connecting = 0,
    /// Registered and exchanging frames
    Active = 1,
    /// Teardown in progress
    Closing = 2,
    /// Torn down and removed from the registry
    Closed = 3,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the connection is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Check if the connection is active
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the transport or sent a close frame
    PeerClosed,
    /// Nothing was read within the read timeout
    ReadTimeout,
    /// Reading from the transport failed
    ReadFailed(String),
    /// The peer sent bytes the codec could not decode
    Protocol(String),
    /// Writing to the transport failed or timed out
    WriteFailed(String),
    /// No heartbeat response arrived before the deadline
    HeartbeatTimeout,
    /// A heartbeat probe could not be written
    HeartbeatSendFailed(String),
    /// Closed by an administrative kick
    Kicked,
    /// Closed because the server is shutting down
    Shutdown,
    /// Closed on request by the application
    Requested(String),
}

impl CloseReason {
    /// Whether the close was caused by a transport or protocol failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ReadFailed(_)
                | Self::Protocol(_)
                | Self::WriteFailed(_)
                | Self::HeartbeatSendFailed(_)
        )
    }

    /// Whether the close was caused by a liveness or read deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout | Self::HeartbeatTimeout)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::ReadTimeout => write!(f, "read timeout"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::HeartbeatSendFailed(e) => write!(f, "heartbeat send failed: {}", e),
            Self::Kicked => write!(f, "kicked"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::Requested(reason) => write!(f, "{}", reason),
        }
    }
}

/// Connection information snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Current state
    pub state: ConnectionState,
    /// Peer address, if the transport has one
    pub peer_addr: Option<SocketAddr>,
    /// When the connection was created
    pub created_at: Instant,
    /// Last inbound activity
    pub last_activity: Instant,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
}

impl ConnectionInfo {
    /// Get the connection duration
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get the idle duration
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of registered connections
    pub active_connections: usize,
    /// Total connections since server start
    pub total_connections: u64,
    /// Server bind address
    pub bind_address: SocketAddr,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpServer {{ active: {}, total: {}, addr: {}, uptime: {:?} }}",
            self.active_connections, self.total_connections, self.bind_address, self.uptime
        )
    }
}
