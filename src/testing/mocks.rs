//! Mock implementations for testing
//!
//! Provides a scriptable in-memory [`Transport`] so the connection lifecycle,
//! dispatch and publishing can be exercised without a broker.

use crate::protocol::{InboundMessage, QoS};
use crate::transport::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

const SESSION_CAPACITY: usize = 64;

/// How the next opened session behaves
#[derive(Debug, Clone, PartialEq)]
pub enum SessionScript {
    /// Broker acknowledges immediately
    Accept,
    /// Broker answers the handshake with an error
    Reject(String),
    /// Broker never answers
    Hang,
    /// `open()` itself fails
    FailOpen(String),
}

/// A publish recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: VecDeque<SessionScript>,
    default_script: Option<SessionScript>,
    session: Option<mpsc::Sender<TransportEvent>>,
    opens: usize,
    closes: usize,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<(String, QoS)>,
    unsubscriptions: Vec<String>,
    fail_requests: bool,
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep a handle after moving one into a
/// client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session is rejected with `reason`
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let transport = Self::new();
        transport.set_default_script(SessionScript::Reject(reason.into()));
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the behaviour of the next unscripted `open()`
    pub fn script(&self, script: SessionScript) {
        self.lock().scripts.push_back(script);
    }

    /// Behaviour once the queued scripts run out (defaults to `Accept`)
    pub fn set_default_script(&self, script: SessionScript) {
        self.lock().default_script = Some(script);
    }

    /// Make publish/subscribe/unsubscribe fail
    pub fn fail_requests(&self, fail: bool) {
        self.lock().fail_requests = fail;
    }

    /// Deliver a message on the current session
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let message = InboundMessage::new(topic, payload);
        match self.lock().session.as_ref() {
            Some(session) => session.try_send(TransportEvent::Message(message)).is_ok(),
            None => false,
        }
    }

    /// End the current session with a transport error
    pub fn drop_session(&self, reason: &str) -> bool {
        match self.lock().session.take() {
            Some(session) => session
                .try_send(TransportEvent::Error(reason.to_string()))
                .is_ok(),
            None => false,
        }
    }

    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Subscribe requests in the order they were made, including re-subscriptions
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.lock().subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.lock().unsubscriptions.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.published.clear();
        state.subscriptions.clear();
        state.unsubscriptions.clear();
    }

    fn check_request(state: &MockState) -> Result<(), TransportError> {
        if state.fail_requests {
            return Err(TransportError::Request("mock request failure".to_string()));
        }
        if state.session.is_none() {
            return Err(TransportError::NoSession);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut state = self.lock();
        state.opens += 1;

        let script = state
            .scripts
            .pop_front()
            .or_else(|| state.default_script.clone())
            .unwrap_or(SessionScript::Accept);

        let (tx, rx) = mpsc::channel(SESSION_CAPACITY);
        match script {
            SessionScript::FailOpen(reason) => return Err(TransportError::Connection(reason)),
            SessionScript::Accept => {
                let _ = tx.try_send(TransportEvent::Connected);
            }
            SessionScript::Reject(reason) => {
                let _ = tx.try_send(TransportEvent::Error(reason));
            }
            SessionScript::Hang => {}
        }

        state.session = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.closes += 1;
        state.session = None;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::check_request(&state)?;
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::check_request(&state)?;
        state.subscriptions.push((pattern.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::check_request(&state)?;
        state.unsubscriptions.push(pattern.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let transport = MockTransport::new();
        transport.script(SessionScript::Reject("first".to_string()));
        transport.script(SessionScript::FailOpen("second".to_string()));

        let mut rx = transport.open().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Error("first".to_string()))
        );

        assert_eq!(
            transport.open().await.unwrap_err(),
            TransportError::Connection("second".to_string())
        );

        let mut rx = transport.open().await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(transport.open_count(), 3);
    }

    #[tokio::test]
    async fn test_inject_and_drop_session() {
        let transport = MockTransport::new();
        assert!(!transport.inject("a", b"x".to_vec()));

        let mut rx = transport.open().await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));

        assert!(transport.inject("a/b", b"{}".to_vec()));
        match rx.recv().await {
            Some(TransportEvent::Message(message)) => assert_eq!(message.topic, "a/b"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(transport.drop_session("network down"));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Error("network down".to_string()))
        );
        assert_eq!(rx.recv().await, None);
        assert!(!transport.has_session());
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let transport = MockTransport::new();
        assert_eq!(
            transport.publish("a", vec![1], QoS::AtMostOnce).await,
            Err(TransportError::NoSession)
        );

        let _rx = transport.open().await.unwrap();
        transport.publish("a", vec![1], QoS::AtLeastOnce).await.unwrap();
        transport.subscribe("a/#", QoS::AtMostOnce).await.unwrap();
        transport.unsubscribe("a/#").await.unwrap();

        assert_eq!(
            transport.published(),
            vec![PublishedMessage {
                topic: "a".to_string(),
                payload: vec![1],
                qos: QoS::AtLeastOnce,
            }]
        );
        assert_eq!(
            transport.subscriptions(),
            vec![("a/#".to_string(), QoS::AtMostOnce)]
        );
        assert_eq!(transport.unsubscriptions(), vec!["a/#".to_string()]);

        transport.fail_requests(true);
        assert!(matches!(
            transport.subscribe("b", QoS::AtMostOnce).await,
            Err(TransportError::Request(_))
        ));
    }
}
