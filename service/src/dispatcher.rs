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

//! Bounded worker pool for inbound messages
//!
//! Every worker owns one bounded queue. Jobs are routed by a hash of their
//! connection id, so all messages from one connection are handled by the
//! same worker in arrival order. A full queue makes [`Dispatcher::submit`]
//! wait, which pushes back on the submitting connection's read pump.

use crate::{ConnectionHandler, ConnectionId, Result, ServerMetrics, ServiceError};
use bytes::Bytes;
use futures::FutureExt;
use heartwire_codec::FrameKind;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// One inbound business message waiting for a worker
#[derive(Debug, Clone)]
pub struct Job {
    /// Connection the message arrived on
    pub connection_id: ConnectionId,
    /// Text or binary
    pub kind: FrameKind,
    /// Message body
    pub payload: Bytes,
}

impl Job {
    /// Create a new job
    pub fn new(connection_id: ConnectionId, kind: FrameKind, payload: Bytes) -> Self {
        Self {
            connection_id,
            kind,
            payload,
        }
    }
}

/// Fixed-size pool of message workers
pub struct Dispatcher {
    queues: RwLock<Vec<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Dispatcher {
    /// Spawn `worker_count` workers, each with a queue of `queue_capacity`
    /// jobs
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        handler: Arc<dyn ConnectionHandler>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let mut queues = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            queues.push(tx);
            workers.push(tokio::spawn(run_worker(
                index,
                rx,
                handler.clone(),
                metrics.clone(),
            )));
        }

        debug!(worker_count, queue_capacity, "Dispatcher started");

        Self {
            queues: RwLock::new(queues),
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Number of workers in the pool
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Queue a job, waiting for space if its worker is saturated
    ///
    /// Returns `ShuttingDown` once the pool no longer accepts jobs.
    pub async fn submit(&self, job: Job) -> Result<()> {
        let sender = {
            let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
            if queues.is_empty() {
                return Err(ServiceError::ShuttingDown);
            }
            queues[route(&job.connection_id, queues.len())].clone()
        };
        sender
            .send(job)
            .await
            .map_err(|_| ServiceError::ShuttingDown)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    ///
    /// Workers still busy after `timeout` are aborted.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if workers.is_empty() {
            return;
        }

        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => info!("Dispatcher drained"),
            Err(_) => {
                warn!(?timeout, "Dispatcher drain timed out, aborting workers");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_count", &self.worker_count)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn route(id: &ConnectionId, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn run_worker(
    index: usize,
    mut rx: mpsc::Receiver<Job>,
    handler: Arc<dyn ConnectionHandler>,
    metrics: Arc<ServerMetrics>,
) {
    while let Some(job) = rx.recv().await {
        let Job {
            connection_id,
            kind,
            payload,
        } = job;
        let outcome = AssertUnwindSafe(handler.on_message(&connection_id, kind, payload))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            metrics.handler_panic();
            error!(
                worker = index,
                connection_id = %connection_id,
                panic = panic_message(panic.as_ref()),
                "Message handler panicked"
            );
        }
    }
    debug!(worker = index, "Worker stopped");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    struct Recorder {
        tx: UnboundedSender<(ConnectionId, Bytes)>,
    }

    #[async_trait]
    impl ConnectionHandler for Recorder {
        async fn on_message(&self, id: &ConnectionId, _kind: FrameKind, payload: Bytes) {
            if payload.as_ref() == b"boom" {
                panic!("handler exploded");
            }
            let _ = self.tx.send((id.clone(), payload));
        }
    }

    type Received = mpsc::UnboundedReceiver<(ConnectionId, Bytes)>;

    fn dispatcher(workers: usize) -> (Dispatcher, Received, Arc<ServerMetrics>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(ServerMetrics::new());
        let dispatcher = Dispatcher::new(workers, 4, Arc::new(Recorder { tx }), metrics.clone());
        (dispatcher, rx, metrics)
    }

    #[test]
    fn test_route_is_stable() {
        let id = ConnectionId::from("stable");
        let first = route(&id, 7);
        for _ in 0..10 {
            assert_eq!(route(&id, 7), first);
        }
        assert!(first < 7);
    }

    #[tokio::test]
    async fn test_per_connection_order() {
        let (dispatcher, mut rx, _) = dispatcher(4);
        let id = ConnectionId::from("ordered");
        for n in 0..50u32 {
            dispatcher
                .submit(Job::new(id.clone(), FrameKind::Text, Bytes::from(n.to_string())))
                .await
                .unwrap();
        }
        for n in 0..50u32 {
            let (got_id, payload) = rx.recv().await.unwrap();
            assert_eq!(got_id, id);
            assert_eq!(payload, Bytes::from(n.to_string()));
        }
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let (dispatcher, mut rx, metrics) = dispatcher(1);
        let id = ConnectionId::from("fragile");
        dispatcher
            .submit(Job::new(id.clone(), FrameKind::Text, Bytes::from_static(b"boom")))
            .await
            .unwrap();
        dispatcher
            .submit(Job::new(id.clone(), FrameKind::Text, Bytes::from_static(b"after")))
            .await
            .unwrap();

        let (_, payload) = rx.recv().await.unwrap();
        assert_eq!(payload.as_ref(), b"after");
        assert_eq!(metrics.snapshot().handler_panics, 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let (dispatcher, _rx, _) = dispatcher(2);
        dispatcher.shutdown(Duration::from_secs(1)).await;
        assert!(dispatcher.is_shut_down());
        let result = dispatcher
            .submit(Job::new("late".into(), FrameKind::Binary, Bytes::new()))
            .await;
        assert!(matches!(result, Err(ServiceError::ShuttingDown)));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
