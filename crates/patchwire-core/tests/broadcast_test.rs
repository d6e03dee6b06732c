//! Fan-out behaviour of the broadcaster under real channels and concurrent
//! use.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use patchwire_core::broadcast::{BroadcastEvent, Broadcaster};
use patchwire_test_utils::props;

#[tokio::test]
async fn disconnected_subscriber_stops_receiving() {
    let broadcaster = Broadcaster::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel::<String>();
    broadcaster.subscribe("s1", tx_a);
    broadcaster.subscribe("s1", tx_b);
    assert_eq!(broadcaster.channel_count("s1"), 2);

    // Client B goes away.
    drop(rx_b);

    let event = BroadcastEvent::patch("demo-card", "inst-1", props(json!({ "title": "New" })));
    let delivered = broadcaster.publish("s1", &event);

    assert_eq!(delivered, 1);
    assert_eq!(broadcaster.channel_count("s1"), 1);
    let frame = rx_a.recv().await.unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&frame).unwrap(),
        json!({ "type": "patch", "key": "demo-card", "instanceId": "inst-1", "patch": { "title": "New" } })
    );
}

#[tokio::test]
async fn every_channel_gets_the_identical_frame() {
    let broadcaster = Broadcaster::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::unbounded_channel();
        broadcaster.subscribe("s1", tx);
        receivers.push(rx);
    }

    let delivered = broadcaster.publish("s1", &BroadcastEvent::ack("req-7", true));
    assert_eq!(delivered, 3);

    let frames: Vec<String> = receivers.iter_mut().map(|rx| rx.try_recv().unwrap()).collect();
    assert!(frames.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(frames[0], r#"{"type":"ack","requestId":"req-7","applied":true}"#);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let broadcaster = Broadcaster::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    broadcaster.subscribe("s1", tx_a);
    broadcaster.subscribe("s2", tx_b);

    broadcaster.publish("s2", &BroadcastEvent::error("boom"));

    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().unwrap(), r#"{"type":"error","message":"boom"}"#);
}

#[tokio::test]
async fn guard_drop_unsubscribes() {
    let broadcaster = Arc::new(Broadcaster::new());
    let (tx, _rx) = mpsc::unbounded_channel::<String>();
    let guard = broadcaster.subscribe_guarded("s1", tx);
    assert_eq!(broadcaster.channel_count("s1"), 1);

    drop(guard);

    assert_eq!(broadcaster.channel_count("s1"), 0);
    assert_eq!(broadcaster.publish("s1", &BroadcastEvent::error("late")), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscribe_publish_unsubscribe() {
    let broadcaster = Arc::new(Broadcaster::new());
    let mut handles = Vec::new();

    for i in 0..16 {
        let b = Arc::clone(&broadcaster);
        handles.push(tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let id = b.subscribe("shared", tx);
            b.publish("shared", &BroadcastEvent::error(format!("from {i}")));
            // Our own publish always reaches us since we subscribed first.
            assert!(rx.recv().await.is_some());
            b.unsubscribe("shared", id);
            b.unsubscribe("shared", id);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(broadcaster.channel_count("shared"), 0);
}
