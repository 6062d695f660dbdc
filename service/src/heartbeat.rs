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

//! Heartbeat supervision
//!
//! Every active connection runs one supervisor task. The task sends a
//! heartbeat probe each `interval` and keeps a single liveness deadline:
//!
//! - A probe arms the deadline at `now + timeout` unless one is already
//!   armed.
//! - A probe response, or any inbound activity when configured, re-arms it
//!   at `now + interval + timeout`.
//! - Reaching the deadline closes the connection with
//!   [`CloseReason::HeartbeatTimeout`].
//!
//! A peer that stays silent is therefore closed `interval + timeout` after
//! the supervisor starts, and a peer answering every probe is never closed.
//! The bookkeeping lives in [`HeartbeatState`], which is driven by a single
//! task so resets and expiry never race.

use crate::{CloseReason, Connection};
use heartwire_codec::{Frame, FrameCodec};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, instrument, trace, warn};

/// Where a connection is in its heartbeat cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeartbeatPhase {
    /// No probe sent and no activity seen yet
    Idle,
    /// Activity seen, deadline pushed out a full cycle
    Armed,
    /// Probe sent, waiting for the peer
    ProbeSent,
    /// Deadline passed; terminal
    Expired,
}

impl fmt::Display for HeartbeatPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Armed => write!(f, "Armed"),
            Self::ProbeSent => write!(f, "ProbeSent"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

/// Heartbeat bookkeeping for one connection
///
/// Holds at most one pending deadline. Time is always passed in, which keeps
/// the state machine deterministic under test.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    interval: Duration,
    timeout: Duration,
    deadline: Option<Instant>,
    phase: HeartbeatPhase,
    probes_sent: u64,
}

impl HeartbeatState {
    /// Create an idle state
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            deadline: None,
            phase: HeartbeatPhase::Idle,
            probes_sent: 0,
        }
    }

    /// Probe period
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Silence tolerated after a probe
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The pending deadline, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Current phase
    pub fn phase(&self) -> HeartbeatPhase {
        self.phase
    }

    /// Number of probes sent so far
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// True once the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.phase == HeartbeatPhase::Expired
    }

    /// Record a probe written at `now`
    ///
    /// Arms `now + timeout` only when no deadline is pending.
    pub fn on_probe_sent(&mut self, now: Instant) {
        if self.is_expired() {
            return;
        }
        self.probes_sent += 1;
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
        self.phase = HeartbeatPhase::ProbeSent;
    }

    /// Record a probe response or qualifying activity at `now`
    pub fn on_activity(&mut self, now: Instant) {
        if self.is_expired() {
            return;
        }
        self.deadline = Some(now + self.interval + self.timeout);
        self.phase = HeartbeatPhase::Armed;
    }

    /// Check the deadline against `now`, moving to `Expired` if it passed
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.phase = HeartbeatPhase::Expired;
                true
            }
            _ => self.is_expired(),
        }
    }
}

/// Run the heartbeat supervisor for `conn` until it closes
#[instrument(skip(conn), fields(connection_id = %conn.id()))]
pub(crate) async fn supervise<C: FrameCodec>(
    conn: Arc<Connection<C>>,
    interval: Duration,
    timeout: Duration,
) {
    let mut state = HeartbeatState::new(interval, timeout);
    let start = Instant::now();

    let mut ticker = interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Only polled while a deadline is armed
    let expiry = sleep_until(start + interval + timeout);
    tokio::pin!(expiry);

    debug!(?interval, ?timeout, "Heartbeat supervisor started");

    loop {
        tokio::select! {
            biased;

            _ = conn.cancelled() => {
                trace!("Heartbeat supervisor cancelled");
                break;
            }

            _ = conn.heartbeat_activity() => {
                state.on_activity(Instant::now());
                if let Some(deadline) = state.deadline() {
                    expiry.as_mut().reset(deadline);
                }
                trace!(phase = %state.phase(), "Heartbeat deadline re-armed");
            }

            _ = &mut expiry, if state.deadline().is_some() => {
                if state.poll_expired(Instant::now()) {
                    warn!(probes_sent = state.probes_sent(), "Heartbeat timed out");
                    conn.close(CloseReason::HeartbeatTimeout).await;
                    break;
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = conn.write_frame(Frame::heartbeat()).await {
                    warn!(error = %e, "Failed to send heartbeat probe");
                    conn.close(CloseReason::HeartbeatSendFailed(e.to_string())).await;
                    break;
                }
                state.on_probe_sent(Instant::now());
                if let Some(deadline) = state.deadline() {
                    expiry.as_mut().reset(deadline);
                }
                trace!(probes_sent = state.probes_sent(), "Heartbeat probe sent");
            }
        }
    }
}
