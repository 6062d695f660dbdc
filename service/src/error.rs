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

//! Error types for the connection service

use crate::registry::BroadcastResult;
use crate::types::ConnectionId;
use heartwire_codec::CodecError;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Connection service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// I/O error from the underlying transport or listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The codec refused to encode a payload; nothing was written and the
    /// connection stays open
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A connection was offered with a blank identifier
    #[error("Connection id must not be empty")]
    EmptyId,

    /// A connection with the same identifier is already registered
    #[error("Connection {0} already exists")]
    DuplicateId(ConnectionId),

    /// Connection with the given ID was not found
    #[error("Connection {0} not found")]
    NotFound(ConnectionId),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing a frame failed; the connection is torn down
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The transport could not be prepared or the upgrade request was refused
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Maximum number of connections reached
    #[error("Maximum connections ({0}) reached")]
    MaxConnectionsReached(usize),

    /// The manager no longer accepts connections or messages
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Server was started twice
    #[error("Server already running")]
    AlreadyRunning,

    /// At least one broadcast delivery failed
    #[error("Broadcast partially failed: {0}")]
    Broadcast(BroadcastResult),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceError {
    /// Check if the error was caused by bad arguments from the caller
    ///
    /// Caller errors are reported synchronously and never affect other
    /// connections.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ServiceError::EmptyId | ServiceError::DuplicateId(_) | ServiceError::NotFound(_)
        ) || matches!(self, ServiceError::Codec(e) if !e.is_io())
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::ConnectionClosed
                | ServiceError::WriteFailed(_)
                | ServiceError::Io(_)
        )
    }
}
