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

//! Concurrent directory of live connections
//!
//! One registry-wide [`RwLock`] guards the map. Inserts and removals take the
//! write lock; lookups, counts and broadcast snapshots take the read lock and
//! release it before any network I/O.

use crate::{Connection, ConnectionId, ConnectionInfo, Result, ServiceError};
use heartwire_codec::{Frame, FrameCodec};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastResult {
    /// Total number of connections attempted
    pub total: usize,
    /// Number of successful sends
    pub succeeded: usize,
    /// Number of failed sends
    pub failed: usize,
    /// Errors that occurred (ConnectionId and error message)
    pub errors: Vec<(ConnectionId, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }

    /// Ids of the connections that could not be reached
    pub fn failed_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.errors.iter().map(|(id, _)| id)
    }

    /// `Ok(self)` if every send succeeded, otherwise `ServiceError::Broadcast`
    pub fn into_result(self) -> Result<Self> {
        if self.all_succeeded() {
            Ok(self)
        } else {
            Err(ServiceError::Broadcast(self))
        }
    }
}

impl fmt::Display for BroadcastResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} delivered", self.succeeded, self.total)?;
        if !self.errors.is_empty() {
            write!(f, "; failed:")?;
            for (id, error) in &self.errors {
                write!(f, " {} ({})", id, error)?;
            }
        }
        Ok(())
    }
}

/// Registry of live connections keyed by id
pub struct ConnectionRegistry<C: FrameCodec> {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection<C>>>>,
    max_connections: usize,
}

impl<C: FrameCodec> ConnectionRegistry<C> {
    /// Create an empty registry holding at most `max_connections` entries
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<Connection<C>>>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<Connection<C>>>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of entries
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Register a connection
    ///
    /// The duplicate and capacity checks and the insert happen under one
    /// write lock.
    pub fn add(&self, conn: Arc<Connection<C>>) -> Result<()> {
        let mut connections = self.write();
        if connections.contains_key(conn.id()) {
            return Err(ServiceError::DuplicateId(conn.id().clone()));
        }
        if connections.len() >= self.max_connections {
            return Err(ServiceError::MaxConnectionsReached(self.max_connections));
        }
        trace!(connection_id = %conn.id(), "Registered");
        connections.insert(conn.id().clone(), conn);
        Ok(())
    }

    /// Remove a connection by id; a missing id is a no-op
    pub fn remove(&self, id: &str) -> Option<Arc<Connection<C>>> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            trace!(connection_id = %id, "Deregistered");
        }
        removed
    }

    /// Remove `conn` only if it is the instance registered under its id
    pub fn remove_if_same(&self, conn: &Connection<C>) -> bool {
        let mut connections = self.write();
        match connections.get(conn.id()) {
            Some(registered) if std::ptr::eq(Arc::as_ptr(registered), conn) => {
                connections.remove(conn.id());
                trace!(connection_id = %conn.id(), "Deregistered");
                true
            }
            _ => false,
        }
    }

    /// Look up a connection that has not finished closing
    pub fn get(&self, id: &str) -> Option<Arc<Connection<C>>> {
        self.read()
            .get(id)
            .filter(|conn| !conn.is_closed())
            .cloned()
    }

    /// True if `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Number of registered connections
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of all registered connections
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().cloned().collect()
    }

    /// All registered connections at this instant
    pub fn snapshot(&self) -> Vec<Arc<Connection<C>>> {
        self.read().values().cloned().collect()
    }

    /// Info snapshots of all registered connections
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.read().values().map(|conn| conn.info()).collect()
    }

    /// Send `frame` to every registered connection concurrently
    ///
    /// Connections are snapshotted first and the lock is released before
    /// sending. A failed send closes that connection and is recorded; it
    /// never stops delivery to the rest.
    pub async fn broadcast(&self, frame: Frame) -> BroadcastResult {
        let targets = self.snapshot();
        let mut result = BroadcastResult {
            total: targets.len(),
            ..Default::default()
        };

        let sends = targets.into_iter().map(|conn| {
            let frame = frame.clone();
            async move {
                let outcome = conn.send(frame).await;
                (conn.id().clone(), outcome)
            }
        });

        for (id, outcome) in futures_util::future::join_all(sends).await {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }

        debug!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "Broadcast complete"
        );
        result
    }
}

impl<C: FrameCodec> fmt::Debug for ConnectionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("count", &self.count())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
