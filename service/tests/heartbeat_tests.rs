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

mod common;

use common::{DeadTransport, Event, RecordingHandler, manager, next_event, quiet_config};
use futures::{SinkExt, StreamExt};
use heartwire_codec::{Frame, PacketCodec};
use heartwire_service::{CloseReason, ServerConfig};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;

fn heartbeat_config(interval: Duration, timeout: Duration) -> ServerConfig {
    quiet_config().with_heartbeat(interval, timeout)
}

/// Answer every probe with an echo of its timestamp
fn answering_peer(remote: DuplexStream) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut framed = Framed::new(remote, PacketCodec::new());
        let mut answered = 0;
        while let Some(Ok(frame)) = framed.next().await {
            if let Frame::Heartbeat { timestamp } = frame {
                if framed.send(Frame::Heartbeat { timestamp }).await.is_err() {
                    break;
                }
                answered += 1;
            }
        }
        answered
    })
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_expires_at_interval_plus_timeout() {
    let interval = Duration::from_secs(10);
    let timeout = Duration::from_secs(20);
    let (handler, mut events) = RecordingHandler::new();
    let manager = manager(heartbeat_config(interval, timeout), handler);
    let (local, _remote) = tokio::io::duplex(64 * 1024);

    let start = Instant::now();
    let conn = manager.accept(local, "silent").await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Connect(_)));

    tokio::time::sleep_until(start + interval + timeout - Duration::from_millis(500)).await;
    assert!(conn.is_active(), "closed before interval + timeout");

    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .expect("not closed shortly after interval + timeout");
    assert!(Instant::now() >= start + interval + timeout);

    assert_eq!(
        next_event(&mut events).await,
        Event::Disconnect("silent".into(), CloseReason::HeartbeatTimeout)
    );
    let snapshot = manager.metrics().snapshot();
    assert!(snapshot.heartbeats_sent >= 1);
    assert_eq!(snapshot.timeout_errors, 1);
    assert_eq!(manager.count(), 0);
}

async fn assert_answering_peer_survives(interval: Duration, timeout: Duration) {
    let (handler, _events) = RecordingHandler::new();
    let manager = manager(heartbeat_config(interval, timeout), handler);
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let peer = answering_peer(remote);

    let conn = manager.accept(local, "chatty").await.unwrap();
    tokio::time::sleep(timeout * 5).await;
    assert!(conn.is_active(), "answering peer expired");

    let expected_probes = (timeout * 5).as_secs() / interval.as_secs();
    assert!(manager.metrics().snapshot().heartbeats_sent >= expected_probes.saturating_sub(1));

    manager.shutdown().await;
    assert!(peer.await.unwrap() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_answering_peer_survives_long_timeout() {
    assert_answering_peer_survives(Duration::from_secs(10), Duration::from_secs(30)).await;
}

#[tokio::test(start_paused = true)]
async fn test_answering_peer_survives_short_timeout() {
    // Timeout shorter than the probe period
    assert_answering_peer_survives(Duration::from_secs(20), Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_business_traffic_counts_as_activity() {
    let interval = Duration::from_secs(10);
    let timeout = Duration::from_secs(10);
    let (handler, _events) = RecordingHandler::new();
    let manager = manager(heartbeat_config(interval, timeout), handler);
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let conn = manager.accept(local, "busy").await.unwrap();

    // Ignores probes but keeps talking
    let mut framed = Framed::new(remote, PacketCodec::new());
    for _ in 0..10 {
        framed.send(Frame::text("ping")).await.unwrap();
        tokio::time::sleep(interval).await;
        assert!(conn.is_active());
    }
}

#[tokio::test(start_paused = true)]
async fn test_business_traffic_ignored_when_disabled() {
    let interval = Duration::from_secs(10);
    let timeout = Duration::from_secs(10);
    let (handler, _events) = RecordingHandler::new();
    let manager = manager(
        heartbeat_config(interval, timeout).with_activity_resets_heartbeat(false),
        handler,
    );
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let start = Instant::now();
    let conn = manager.accept(local, "ignored").await.unwrap();

    let mut framed = Framed::new(remote, PacketCodec::new());
    let talker = tokio::spawn(async move {
        loop {
            if framed.send(Frame::text("ping")).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    tokio::time::timeout(interval + timeout + Duration::from_secs(1), conn.closed())
        .await
        .expect("business traffic kept the connection alive");
    assert!(Instant::now() >= start + interval + timeout);
    talker.abort();
}

#[tokio::test(start_paused = true)]
async fn test_probe_send_failure_closes() {
    let interval = Duration::from_secs(5);
    let (handler, mut events) = RecordingHandler::new();
    let manager = manager(heartbeat_config(interval, Duration::from_secs(60)), handler);

    let start = Instant::now();
    let conn = manager.accept(DeadTransport, "dead").await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Connect(_)));

    tokio::time::timeout(interval * 2, conn.closed())
        .await
        .expect("probe failure did not close");
    assert!(Instant::now() >= start + interval);
    assert!(matches!(
        next_event(&mut events).await,
        Event::Disconnect(_, CloseReason::HeartbeatSendFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_disabled() {
    let (handler, _events) = RecordingHandler::new();
    let manager = manager(quiet_config(), handler);
    let (local, _remote) = tokio::io::duplex(1024);
    let conn = manager.accept(local, "quiet").await.unwrap();

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(conn.is_active());
    assert_eq!(manager.metrics().snapshot().heartbeats_sent, 0);
}
