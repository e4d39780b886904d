//! Connection lifecycle tests
//!
//! Drive the retry state machine through the in-memory transport: initial
//! connection failures, session loss after a successful connect, and
//! cancellation via `disconnect()`.


use service_messaging::client::{ConnectionEvent, ConnectionState, MessagingClient};
use service_messaging::error::ClientError;
use service_messaging::testing::{MockTransport, SessionScript};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{test_client, wait_for_event, wait_for_state, WAIT};

#[tokio::test]
async fn test_connect_gives_up_after_retry_budget() {
    // Arrange: every session is rejected, two retries allowed
    let transport = MockTransport::rejecting("connection refused");
    let client = test_client(&transport, 2);

    // Act
    let result = client.connect().await;

    // Assert: initial attempt plus two retries, then rejection
    match result {
        Err(ClientError::ConnectionFailed { attempts, reason }) => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("connection refused"));
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    assert_eq!(transport.open_count(), 3);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_reconnects_after_session_loss_without_surfacing_error() {
    // Arrange
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    client.connect().await.unwrap();
    let mut events = client.events();

    // Act: the broker drops the session
    assert!(transport.drop_session("connection reset"));

    // Assert: Reconnecting(1) then back to Connected
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            ConnectionEvent::StateChanged {
                to: ConnectionState::Reconnecting(1),
                ..
            }
        )
    })
    .await;
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

    assert!(client.is_connected());
    assert_eq!(transport.open_count(), 2);
    assert_eq!(client.stats().reconnect_count, 1);
    assert_eq!(client.stats().sessions_lost, 1);
}

#[tokio::test]
async fn test_exhausted_reconnection_closes_client() {
    // Arrange: connected once, then the broker refuses everything
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    client.connect().await.unwrap();
    let mut events = client.events();
    transport.set_default_script(SessionScript::Reject("server unavailable".to_string()));

    // Act
    transport.drop_session("connection reset");

    // Assert
    let gave_up = wait_for_event(&mut events, |event| {
        matches!(event, ConnectionEvent::GaveUp { .. })
    })
    .await;
    assert!(matches!(gave_up, ConnectionEvent::GaveUp { attempts: 3, .. }));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test]
async fn test_connect_after_give_up_starts_fresh_lifecycle() {
    let transport = MockTransport::rejecting("refused");
    let client = test_client(&transport, 1);
    assert!(client.connect().await.is_err());

    transport.set_default_script(SessionScript::Accept);
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_right_after_give_up_opens_new_session() {
    // The supervisor that gave up may still be running on another worker
    // when the next connect() arrives.
    for iteration in 0..200 {
        let transport = MockTransport::rejecting("refused");
        let client = test_client(&transport, 0);
        assert!(client.connect().await.is_err());

        transport.set_default_script(SessionScript::Accept);
        let result = client.connect().await;

        assert!(result.is_ok(), "iteration {iteration}: {result:?}");
        assert!(client.is_connected());
        assert_eq!(transport.open_count(), 2);
    }
}

#[tokio::test]
async fn test_connect_after_disconnect_reconnects() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);

    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn test_double_disconnect_is_idempotent() {
    let transport = MockTransport::new();
    let client = test_client(&transport, 2);
    client.connect().await.unwrap();

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_disconnect_interrupts_reconnection_delay() {
    // Arrange: long delay between attempts
    let transport = MockTransport::new();
    let mut connection = test_helpers::fast_connection(5);
    connection.reconnect_period_ms = 60_000;
    let client = MessagingClient::new("test-service", "test-service-1", transport.clone(), &connection);
    client.connect().await.unwrap();

    transport.drop_session("connection reset");
    wait_for_state(&client, |state| *state == ConnectionState::Reconnecting(1)).await;

    // Act
    let started = Instant::now();
    client.disconnect().await.unwrap();

    // Assert: no waiting out the delay, no further attempts
    assert!(started.elapsed() < WAIT);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn test_disconnect_during_first_connect_rejects_it() {
    let transport = MockTransport::rejecting("refused");
    let mut connection = test_helpers::fast_connection(5);
    connection.reconnect_period_ms = 60_000;
    let client = Arc::new(MessagingClient::new(
        "test-service",
        "test-service-1",
        transport.clone(),
        &connection,
    ));

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    wait_for_state(&client, |state| *state == ConnectionState::Reconnecting(1)).await;

    client.disconnect().await.unwrap();

    let result = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_connection_failed());
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_concurrent_connect_joins_in_flight_lifecycle() {
    let transport = MockTransport::new();
    transport.script(SessionScript::Reject("warming up".to_string()));
    let client = Arc::new(test_client(&transport, 2));

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(transport.open_count(), 2, "one lifecycle, one retry");
}

#[tokio::test]
async fn test_unanswered_handshake_times_out() {
    let transport = MockTransport::new();
    transport.set_default_script(SessionScript::Hang);
    let client = test_client(&transport, 1);

    let started = Instant::now();
    let error = client.connect().await.unwrap_err();

    assert!(error.is_connection_failed());
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(transport.open_count(), 2);
}
