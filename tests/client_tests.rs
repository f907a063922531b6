//! Integration tests for the push channel.
//!
//! Uses the scripted `MockTransport`/`MockConnector` from `tests/common` to
//! drive `TransportClient` through open, frame delivery, heartbeat and
//! reconnection, and checks what subscribers and the server side observe.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scoreboard_sync::protocol::OutboundFrame;
use scoreboard_sync::status::GameStatus;
use scoreboard_sync::{
    ConnectionRegistry, ConnectionState, ScoreboardError, SyncConfig, TransportClient,
};
use tokio_test::{assert_err, assert_ok};

use common::{heartbeat_frame, init_tracing, refused, status_frame, team, MockConnector, MockTransport};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn client_with(connector: Arc<MockConnector>, config: SyncConfig) -> TransportClient {
    TransportClient::new("48213", config, connector)
}

async fn wait_for_state(client: &TransportClient, wanted: ConnectionState) {
    let mut rx = client.state_changes();
    tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached")
        .expect("client dropped");
}

fn sample_status() -> GameStatus {
    GameStatus::new(
        "ONGOING",
        None,
        vec![team(1, "Blue", "3", true), team(2, "Green", "7", false)],
    )
}

// ════════════════════════════════════════════════════════════════════
// Frame delivery
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn status_frames_reach_subscribers_in_order() {
    init_tracing();
    let first = sample_status();
    let second = GameStatus::new("FINISHED", None, vec![team(1, "Blue", "5", true)]);
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok(status_frame(&first))),
        Some(Ok(status_frame(&second))),
    ]);
    let client = client_with(MockConnector::new(vec![Ok(transport)]), SyncConfig::default());

    let (_sub, mut rx) = client.subscribe_channel();
    assert_ok!(client.connect().await);

    let got = rx.recv().await.expect("first snapshot");
    assert_eq!(got.status_code, "ONGOING");
    assert_eq!(got.team(1).unwrap().score_value(), 3);
    assert!(got.team(1).unwrap().finished());

    let got = rx.recv().await.expect("second snapshot");
    assert_eq!(got.status_code, "FINISHED");
    assert_eq!(client.publisher().latest().unwrap().status_code, "FINISHED");

    client.disconnect().await;
}

#[tokio::test]
async fn heartbeats_and_bad_frames_never_reach_subscribers() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok(heartbeat_frame(1_700_000_000_000))),
        Some(Ok("not json at all".to_string())),
        Some(Ok(r#"{"event":"game_status_update","data":"<plist><dict>"}"#.to_string())),
        Some(Ok(r#"{"event":"chat","data":"hi"}"#.to_string())),
        Some(Ok(status_frame(&sample_status()))),
    ]);
    let client = client_with(MockConnector::new(vec![Ok(transport)]), SyncConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = Arc::clone(&seen);
        client.subscribe(move |status| seen.lock().unwrap().push(status.status_code.clone()))
    };
    let (_chan, mut rx) = client.subscribe_channel();
    client.connect().await.unwrap();

    rx.recv().await.expect("valid snapshot");
    assert_eq!(*seen.lock().unwrap(), vec!["ONGOING".to_string()]);
    assert_eq!(client.state(), ConnectionState::Open);

    client.disconnect().await;
}

#[tokio::test]
async fn panicking_subscriber_does_not_block_others() {
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Ok(status_frame(&sample_status())))]);
    let client = client_with(MockConnector::new(vec![Ok(transport)]), SyncConfig::default());

    let _bad = client.subscribe(|_| panic!("subscriber bug"));
    let delivered = Arc::new(AtomicUsize::new(0));
    let _good = {
        let delivered = Arc::clone(&delivered);
        client.subscribe(move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        })
    };
    let (_chan, mut rx) = client.subscribe_channel();
    client.connect().await.unwrap();

    rx.recv().await.expect("snapshot");
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert!(client.is_connected());

    client.disconnect().await;
}

// ════════════════════════════════════════════════════════════════════
// Heartbeat
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn heartbeat_frames_have_the_wire_shape() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let client = client_with(
        MockConnector::new(vec![Ok(transport)]),
        SyncConfig::default().with_heartbeat_interval(Duration::from_secs(30)),
    );
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    let frames = sent.lock().unwrap().clone();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert!(value["timestamp"].is_i64());
        let parsed: OutboundFrame = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed, OutboundFrame::Heartbeat { .. }));
    }

    client.disconnect().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(sent.lock().unwrap().len(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn eleven_unexpected_closes_make_ten_attempts() {
    init_tracing();
    // The first socket closes at once; every redial is refused, and each
    // refusal counts as another unexpected close.
    let (transport, _sent, _closed) = MockTransport::new(vec![None]);
    let connector = MockConnector::new(vec![Ok(transport)]);
    let client = client_with(
        Arc::clone(&connector),
        SyncConfig::default()
            .with_reconnect_delay(Duration::from_secs(5))
            .with_max_reconnect_attempts(10),
    );

    let start = tokio::time::Instant::now();
    client.connect().await.unwrap();
    wait_for_state(&client, ConnectionState::Failed).await;

    assert_eq!(connector.dial_count(), 1 + 10);
    assert!(start.elapsed() >= Duration::from_secs(50));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.dial_count(), 11);
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_the_attempt_count() {
    let (first, _, _) = MockTransport::new(vec![None]);
    let (second, _, _) = MockTransport::new(vec![None]);
    let (third, _, _) = MockTransport::new(vec![]);
    // close, refused, open, close, refused, open
    let connector = MockConnector::new(vec![
        Ok(first),
        Err(refused()),
        Ok(second),
        Err(refused()),
        Ok(third),
    ]);
    let client = client_with(
        Arc::clone(&connector),
        SyncConfig::default().with_max_reconnect_attempts(2),
    );

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Two attempts per outage would exhaust a cap of 2 without the reset.
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(connector.dial_count(), 5);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn frames_after_reconnect_are_delivered() {
    let (first, _, _) = MockTransport::new(vec![None]);
    let (second, _, _) = MockTransport::new(vec![Some(Ok(status_frame(&sample_status())))]);
    let client = client_with(
        MockConnector::new(vec![Ok(first), Ok(second)]),
        SyncConfig::default(),
    );
    let (_sub, mut rx) = client.subscribe_channel();

    client.connect().await.unwrap();
    let status = rx.recv().await.expect("snapshot after reconnect");
    assert_eq!(status.teams.len(), 2);
    assert!(client.is_connected());

    client.disconnect().await;
}

#[tokio::test]
async fn initial_connect_failure_is_returned() {
    let connector = MockConnector::new(vec![Err(ScoreboardError::Timeout)]);
    let client = client_with(Arc::clone(&connector), SyncConfig::default());

    let result = client.connect().await;
    assert_err!(&result);
    assert!(matches!(result, Err(ScoreboardError::Timeout)));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(connector.dial_count(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Disconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn disconnect_is_idempotent_and_closes_the_socket() {
    let (transport, _sent, closed) = MockTransport::new(vec![]);
    let client = client_with(MockConnector::new(vec![Ok(transport)]), SyncConfig::default());
    client.connect().await.unwrap();

    client.disconnect().await;
    client.disconnect().await;

    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(matches!(client.send("late"), Err(ScoreboardError::NotConnected)));
}

#[tokio::test]
async fn connect_after_disconnect_dials_again() {
    let (a, _, _) = MockTransport::new(vec![]);
    let (b, _, _) = MockTransport::new(vec![]);
    let connector = MockConnector::new(vec![Ok(a), Ok(b)]);
    let client = client_with(Arc::clone(&connector), SyncConfig::default());

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(connector.dial_count(), 1);

    client.disconnect().await;
    client.connect().await.unwrap();
    assert_eq!(connector.dial_count(), 2);
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Registry
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn registry_shares_one_socket_per_instance() {
    let (transport, _sent, closed) =
        MockTransport::new(vec![Some(Ok(status_frame(&sample_status())))]);
    let connector = MockConnector::new(vec![Ok(transport)]);
    let registry = ConnectionRegistry::new(SyncConfig::default(), connector.clone());

    let a = registry.acquire("48213").await.unwrap();
    let b = registry.acquire("48213").await.unwrap();
    assert_eq!(connector.dial_count(), 1);
    assert_eq!(registry.holders("48213").await, 2);

    let (_sub, mut rx) = b.subscribe_channel();
    // The snapshot may have arrived before the channel existed.
    let latest = match a.publisher().latest() {
        Some(status) => status,
        None => rx.recv().await.expect("snapshot"),
    };
    assert_eq!(latest.teams.len(), 2);

    a.release().await;
    assert!(!closed.load(Ordering::Relaxed));
    b.release().await;
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(registry.holders("48213").await, 0);
}
