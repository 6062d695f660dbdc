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

//! Server and connection configuration
//!
//! # Example
//!
//! ```
//! use heartwire_service::{OriginPolicy, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::default()
//!     .with_max_connections(500)
//!     .with_heartbeat(Duration::from_secs(15), Duration::from_secs(45))
//!     .with_origin_policy(OriginPolicy::allow_list(["https://example.com"]));
//! assert!(config.validate().is_ok());
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Default read/write buffer capacity in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Default heartbeat probe period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Default silence tolerated before a connection is declared dead
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default read deadline
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Default write deadline
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy applied to the origin presented with an upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    /// Accept every origin, including none
    #[default]
    AllowAll,
    /// Accept only the listed origins (exact match)
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// Build an allow-list policy
    pub fn allow_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowList(origins.into_iter().map(Into::into).collect())
    }

    /// Check whether an origin passes this policy
    ///
    /// A missing origin only passes [`OriginPolicy::AllowAll`].
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::AllowList(allowed) => {
                origin.is_some_and(|origin| allowed.iter().any(|a| a == origin))
            }
        }
    }
}

/// Server configuration
///
/// This structure contains all configuration options for the connection
/// manager and the TCP server. Use the builder pattern methods to customize
/// the configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Initial capacity of each connection's read buffer
    pub read_buffer_size: usize,

    /// Bytes buffered by a connection's writer before it flushes
    pub write_buffer_size: usize,

    /// Period between heartbeat probes (`None` disables heartbeats)
    pub heartbeat_interval: Option<Duration>,

    /// Silence tolerated after a probe before the connection is closed
    pub heartbeat_timeout: Duration,

    /// Timeout for read operations
    ///
    /// If no frame is received within this duration the connection is closed.
    pub read_timeout: Duration,

    /// Timeout for write operations
    ///
    /// If a frame cannot be written within this duration the connection is closed.
    pub write_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Number of dispatcher workers running message handlers
    pub worker_count: usize,

    /// Jobs each dispatcher worker may queue before submitters wait
    pub worker_queue_capacity: usize,

    /// Origin check applied by `accept_with_origin`
    pub origin_policy: OriginPolicy,

    /// Count inbound business frames as heartbeat responses
    pub activity_resets_heartbeat: bool,

    /// Timeout for graceful shutdown
    ///
    /// The server will wait this long for dispatcher workers to drain before
    /// giving up on them.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8999)),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_connections: 12000,
            worker_count: 50,
            worker_queue_capacity: 1024,
            origin_policy: OriginPolicy::AllowAll,
            activity_resets_heartbeat: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the read and write buffer sizes
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Enable heartbeats with the given probe interval and timeout
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self.heartbeat_timeout = timeout;
        self
    }

    /// Disable heartbeat probing
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = None;
        self
    }

    /// Set the read timeout duration
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the dispatcher worker count and per-worker queue capacity
    pub fn with_workers(mut self, count: usize, queue_capacity: usize) -> Self {
        self.worker_count = count;
        self.worker_queue_capacity = queue_capacity;
        self
    }

    /// Set the origin policy
    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Choose whether business frames also count as heartbeat responses
    pub fn with_activity_resets_heartbeat(mut self, enabled: bool) -> Self {
        self.activity_resets_heartbeat = enabled;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err("buffer sizes must be greater than 0".to_string());
        }

        if let Some(interval) = self.heartbeat_interval {
            if interval.is_zero() {
                return Err("heartbeat_interval must be greater than 0".to_string());
            }
            if self.heartbeat_timeout.is_zero() {
                return Err("heartbeat_timeout must be greater than 0".to_string());
            }
        }

        if self.read_timeout.is_zero() {
            return Err("read_timeout must be greater than 0".to_string());
        }

        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }

        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".to_string());
        }

        if self.worker_queue_capacity == 0 {
            return Err("worker_queue_capacity must be greater than 0".to_string());
        }

        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
