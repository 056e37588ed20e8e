//! End-to-end routing of inbound messages through a live session

use std::sync::Arc;
use std::time::Duration;
use swiftmail::config::BrokerConfig;
use swiftmail::dispatch::ChannelHandler;
use swiftmail::error::LinkError;
use swiftmail::protocol::{Message, QoS};
use swiftmail::session::{ConnectionManager, RetryPolicy, SessionState, StatusEvent};
use swiftmail::testing::mocks::{FailingHandler, MockTransport, RecordingHandler};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};

fn broker() -> BrokerConfig {
    BrokerConfig::new("localhost", 1883, "SwiftMail-test")
}

fn mock_manager() -> (ConnectionManager<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(transport.clone(), RetryPolicy::default());
    (manager, transport)
}

async fn wait_for_received(handler: &RecordingHandler, count: usize) {
    for _ in 0..100 {
        if handler.received().await.len() >= count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("handler received {} messages", handler.received().await.len());
}

#[tokio::test(start_paused = true)]
async fn test_message_routed_only_to_matching_filter() {
    let (mut manager, transport) = mock_manager();
    let a = Arc::new(RecordingHandler::new("a"));
    let c = Arc::new(RecordingHandler::new("c"));
    manager.subscribe("a/#", QoS::AtMostOnce, a.clone()).await.unwrap();
    manager.subscribe("c/#", QoS::AtMostOnce, c.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();

    assert!(transport.deliver(Message::new("a/b", "hello", QoS::AtMostOnce)).await);
    wait_for_received(&a, 1).await;

    let received = a.received().await;
    assert_eq!(received[0].topic, "a/b");
    assert_eq!(received[0].payload_str(), Some("hello"));
    assert!(c.received().await.is_empty());
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_messages_dispatched_in_arrival_order() {
    let (mut manager, transport) = mock_manager();
    let (tx, mut rx) = mpsc::channel(16);
    manager
        .subscribe("swiftmail/#", QoS::AtLeastOnce, Arc::new(ChannelHandler::new(tx)))
        .await
        .unwrap();
    manager.connect(broker()).await.unwrap();

    for i in 0..5 {
        transport
            .deliver(Message::new(format!("swiftmail/{i}"), vec![i as u8], QoS::AtLeastOnce))
            .await;
    }

    let mut topics = Vec::new();
    for _ in 0..5 {
        let message = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        topics.push(message.topic);
    }
    assert_eq!(
        topics,
        vec!["swiftmail/0", "swiftmail/1", "swiftmail/2", "swiftmail/3", "swiftmail/4"]
    );
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_filters_each_invoked_once() {
    let (mut manager, transport) = mock_manager();
    let order = Arc::new(Mutex::new(Vec::new()));
    let wide = Arc::new(RecordingHandler::with_log("wide", order.clone()));
    let exact = Arc::new(RecordingHandler::with_log("exact", order.clone()));
    manager.subscribe("mailbox/#", QoS::AtMostOnce, wide.clone()).await.unwrap();
    manager
        .subscribe("mailbox/front/sensors", QoS::AtMostOnce, exact.clone())
        .await
        .unwrap();
    manager.connect(broker()).await.unwrap();

    transport
        .deliver(Message::new("mailbox/front/sensors", "{}", QoS::AtMostOnce))
        .await;
    wait_for_received(&exact, 1).await;

    assert_eq!(*order.lock().await, vec!["wide", "exact"]);
    assert_eq!(wide.received().await.len(), 1);
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_handler_can_publish_reply() {
    let (mut manager, transport) = mock_manager();
    let echo = Arc::new(RecordingHandler::replying_to("echo", "swiftmail/replies"));
    manager.subscribe("swiftmail/requests", QoS::AtLeastOnce, echo.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();

    transport
        .deliver(Message::new("swiftmail/requests", "ping", QoS::AtLeastOnce))
        .await;
    wait_for_received(&echo, 1).await;
    sleep(Duration::from_millis(10)).await;

    let published = transport.current_client().await.unwrap().published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "swiftmail/replies");
    assert_eq!(published[0].payload_str(), Some("ping"));
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_does_not_stop_dispatch() {
    let (mut manager, transport) = mock_manager();
    let mut events = manager.status_events();
    let after = Arc::new(RecordingHandler::new("after"));
    manager
        .subscribe("a/#", QoS::AtMostOnce, Arc::new(FailingHandler::new("boom")))
        .await
        .unwrap();
    manager.subscribe("a/+", QoS::AtMostOnce, after.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();

    transport.deliver(Message::new("a/1", "x", QoS::AtMostOnce)).await;
    transport.deliver(Message::new("a/2", "y", QoS::AtMostOnce)).await;
    wait_for_received(&after, 2).await;

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let StatusEvent::HandlerFailed { filter, error, .. } = event {
            assert_eq!(filter, "a/#");
            assert_eq!(error, LinkError::handler("boom"));
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
    assert_eq!(manager.state(), SessionState::Connected);
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_message_with_wildcard_topic_dropped() {
    let (mut manager, transport) = mock_manager();
    let mut events = manager.status_events();
    let all = Arc::new(RecordingHandler::new("all"));
    manager.subscribe("#", QoS::AtMostOnce, all.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();

    transport.deliver(Message::new("a/+/c", "x", QoS::AtMostOnce)).await;
    transport.deliver(Message::new("a/b/c", "y", QoS::AtMostOnce)).await;
    wait_for_received(&all, 1).await;

    let received = all.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic, "a/b/c");

    let mut dropped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StatusEvent::MessageDropped { topic, .. } = event {
            dropped.push(topic);
        }
    }
    assert_eq!(dropped, vec!["a/+/c"]);
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_filter_no_longer_receives() {
    let (mut manager, transport) = mock_manager();
    let handler = Arc::new(RecordingHandler::new("h"));
    let other = Arc::new(RecordingHandler::new("other"));
    manager.subscribe("a/#", QoS::AtMostOnce, handler.clone()).await.unwrap();
    manager.subscribe("b/#", QoS::AtMostOnce, other.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();

    assert!(manager.unsubscribe("a/#").await.unwrap());
    transport.deliver(Message::new("a/1", "x", QoS::AtMostOnce)).await;
    transport.deliver(Message::new("b/1", "y", QoS::AtMostOnce)).await;
    wait_for_received(&other, 1).await;

    assert!(handler.received().await.is_empty());
    manager.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_health_records_last_message() {
    let (mut manager, transport) = mock_manager();
    let handler = Arc::new(RecordingHandler::new("h"));
    manager.subscribe("a/#", QoS::AtMostOnce, handler.clone()).await.unwrap();
    manager.connect(broker()).await.unwrap();
    assert_eq!(manager.health().await.time_since_last_message, None);

    transport.deliver(Message::new("a/1", "x", QoS::AtMostOnce)).await;
    wait_for_received(&handler, 1).await;
    sleep(Duration::from_secs(5)).await;

    let health = manager.health().await;
    let since = health.time_since_last_message.unwrap();
    assert!(since >= Duration::from_secs(5));
    assert!(health.is_healthy);
    manager.disconnect().await.unwrap();
}
