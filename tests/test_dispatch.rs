//! Inbound dispatch tests
//!
//! Messages injected on the mock session travel through the connection
//! manager's queue into the registry, the same path a broker message takes.


use serde_json::json;
use service_messaging::client::{ConnectionEvent, ConnectionState, HandlerResult};
use service_messaging::protocol::{Message, Payload, QoS};
use service_messaging::testing::MockTransport;
use std::time::Duration;
use test_helpers::{test_client, wait_for_event, WAIT};
use tokio::sync::mpsc;

/// Handler forwarding `label:topic` for every delivery
fn recorder(
    tx: &mpsc::UnboundedSender<String>,
    label: &'static str,
) -> impl Fn(Message) -> std::future::Ready<HandlerResult> + Send + Sync + 'static {
    let tx = tx.clone();
    move |message: Message| {
        let _ = tx.send(format!("{label}:{}", message.topic));
        std::future::ready(Ok(()))
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("channel closed")
}

#[tokio::test]
async fn test_json_message_delivered_once_through_wildcard() {
    // Arrange
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .on_message("a/+", move |message: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                HandlerResult::Ok(())
            }
        })
        .await
        .unwrap();
    client.connect().await.unwrap();

    // Act
    transport.inject("a/b", br#"{"x":1}"#.to_vec());

    // Assert
    let message = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.topic, "a/b");
    assert_eq!(message.pattern, "a/+");
    assert_eq!(message.payload, Payload::Json(json!({"x": 1})));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "message must be delivered exactly once");
}

#[tokio::test]
async fn test_handlers_run_in_registration_order() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.on_message("orders/#", recorder(&tx, "first")).await.unwrap();
    client.on_message("orders/+", recorder(&tx, "second")).await.unwrap();
    client.on_message("orders/#", recorder(&tx, "third")).await.unwrap();
    client.connect().await.unwrap();

    transport.inject("orders/42", b"{}".to_vec());

    assert_eq!(next(&mut rx).await, "first:orders/42");
    assert_eq!(next(&mut rx).await, "third:orders/42");
    assert_eq!(next(&mut rx).await, "second:orders/42");
}

#[tokio::test]
async fn test_failing_handlers_do_not_block_others() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .on_message("jobs/+", |_message: Message| async move {
            HandlerResult::Err("handler error".into())
        })
        .await
        .unwrap();
    client
        .on_message("jobs/+", |message: Message| async move {
            if message.topic.ends_with("boom") {
                panic!("handler panic");
            }
            HandlerResult::Ok(())
        })
        .await
        .unwrap();
    client.on_message("jobs/+", recorder(&tx, "survivor")).await.unwrap();
    client.connect().await.unwrap();

    transport.inject("jobs/boom", b"{}".to_vec());
    transport.inject("jobs/next", b"{}".to_vec());

    assert_eq!(next(&mut rx).await, "survivor:jobs/boom");
    assert_eq!(next(&mut rx).await, "survivor:jobs/next");
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_undecodable_payload_delivered_raw() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .on_message("#", move |message: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message.payload);
                HandlerResult::Ok(())
            }
        })
        .await
        .unwrap();
    client.connect().await.unwrap();

    transport.inject("sensors/raw", b"temp=21.5".to_vec());

    let payload = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(payload.is_raw());
    assert_eq!(payload.as_text(), Some("temp=21.5"));
}

#[tokio::test]
async fn test_removed_handler_is_not_invoked() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let removed = client.on_message("a/b", recorder(&tx, "removed")).await.unwrap();
    client.on_message("a/b", recorder(&tx, "kept")).await.unwrap();
    client.connect().await.unwrap();

    assert!(client.remove_handler("a/b", removed).await);
    transport.inject("a/b", b"{}".to_vec());

    assert_eq!(next(&mut rx).await, "kept:a/b");
    assert_eq!(client.registered_patterns().await, vec!["a/b".to_string()]);
}

#[tokio::test]
async fn test_subscriptions_restored_after_reconnect() {
    // Arrange
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.on_message("alerts/#", recorder(&tx, "h")).await.unwrap();
    client.subscribe("metrics/+", QoS::AtLeastOnce).await.unwrap_err();
    client.connect().await.unwrap();
    client.subscribe("metrics/+", QoS::AtLeastOnce).await.unwrap();
    transport.clear_history();

    // Act
    let mut events = client.events();
    transport.drop_session("connection reset");
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            ConnectionEvent::StateChanged {
                to: ConnectionState::Connected,
                ..
            }
        )
    })
    .await;

    // Assert: both subscriptions re-established, delivery resumes
    tokio::time::timeout(WAIT, async {
        while transport.subscriptions().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions were not restored");

    let subscriptions = transport.subscriptions();
    assert!(subscriptions.contains(&("alerts/#".to_string(), QoS::AtMostOnce)));
    assert!(subscriptions.contains(&("metrics/+".to_string(), QoS::AtLeastOnce)));

    transport.inject("alerts/disk", b"{}".to_vec());
    assert_eq!(next(&mut rx).await, "h:alerts/disk");
}

#[tokio::test]
async fn test_message_without_handlers_is_ignored() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.on_message("a/b", recorder(&tx, "h")).await.unwrap();
    client.connect().await.unwrap();

    transport.inject("x/y", b"{}".to_vec());
    transport.inject("a/b", b"{}".to_vec());

    assert_eq!(next(&mut rx).await, "h:a/b");
}
