//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and event loop. Every `open()` builds
//! a fresh client/event-loop pair and spawns a task that polls it, translating
//! rumqttc events into [`TransportEvent`]s. The task stops at the first
//! connection error instead of letting rumqttc reconnect by itself, so the
//! connection manager stays the single owner of the retry policy.
//!
//! Publish, subscribe and unsubscribe return once the broker acknowledges
//! the request (QoS 0 publishes: once written). A refusal fails the request;
//! rumqttc also ends the session on it, which hands recovery to the
//! connection manager.

use super::acks::{PendingAcks, RequestKind};
use super::connection::{configure_mqtt_options, redact_broker_url, to_mqtt_qos};
use super::events::{route_mqtt_event, EventRoute};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::QoS;
use crate::transport::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 10;
/// Capacity of the per-session event stream
const EVENT_CAPACITY: usize = 64;
/// Time the event loop gets to flush a DISCONNECT before it is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(2);

struct Session {
    client: AsyncClient,
    acks: Arc<PendingAcks>,
    event_loop_handle: JoinHandle<()>,
}

/// rumqttc-backed broker transport
pub struct MqttTransport {
    client_id: String,
    config: ClientConfig,
    ack_timeout: Duration,
    session: Mutex<Option<Session>>,
    /// Serializes request submission so packet ids bind in submission order
    request_order: Mutex<()>,
}

impl MqttTransport {
    /// Create a transport; options are validated now, the network is touched on `open()`
    pub fn new(client_id: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        let client_id = client_id.into();
        configure_mqtt_options(&client_id, &config)?;

        Ok(Self {
            client_id,
            ack_timeout: Duration::from_millis(config.connection.connect_timeout_ms),
            config,
            session: Mutex::new(None),
            request_order: Mutex::new(()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Helper method to create new MQTT client and event loop
    fn create_connection(&self) -> Result<(AsyncClient, EventLoop), TransportError> {
        let mqtt_options = configure_mqtt_options(&self.client_id, &self.config)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CAPACITY))
    }

    /// Clone the current client handle so no lock is held across network I/O
    async fn current_session(&self) -> Result<(AsyncClient, Arc<PendingAcks>), TransportError> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|session| (session.client.clone(), session.acks.clone()))
            .ok_or(TransportError::NoSession)
    }

    /// Hand a request to rumqttc and wait for the broker's acknowledgement
    async fn request<F, Fut>(&self, kind: RequestKind, submit: F) -> Result<(), TransportError>
    where
        F: FnOnce(AsyncClient) -> Fut,
        Fut: Future<Output = Result<(), rumqttc::v5::ClientError>>,
    {
        let (client, acks) = self.current_session().await?;

        let ack = {
            let _order = self.request_order.lock().await;
            let ack = acks.enqueue(kind);
            if let Err(e) = submit(client).await {
                acks.cancel_last(kind);
                return Err(TransportError::Request(e.to_string()));
            }
            ack
        };

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(TransportError::Request(reason)),
            Ok(Err(_)) => Err(TransportError::Connection(
                "session ended before acknowledgement".to_string(),
            )),
            Err(_) => Err(TransportError::Request(format!(
                "no acknowledgement within {}ms",
                self.ack_timeout.as_millis()
            ))),
        }
    }

    /// Poll the event loop until the session ends or the receiver goes away
    async fn drive_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        acks: Arc<PendingAcks>,
    ) {
        debug!(client_id = %client_id, "MQTT event loop started");
        let mut end_reason = "session closed".to_string();
        loop {
            match event_loop.poll().await {
                Ok(event) => match route_mqtt_event(&event) {
                    EventRoute::Forward(transport_event) => {
                        if events.send(transport_event).await.is_err() {
                            break;
                        }
                    }
                    EventRoute::Terminal(transport_event) => {
                        let _ = events.send(transport_event).await;
                        break;
                    }
                    EventRoute::Sent(kind, pkid) => acks.bind(kind, pkid),
                    EventRoute::Acknowledged { kind, pkid, result } => {
                        if let Err(reason) = &result {
                            error!(client_id = %client_id, ?kind, pkid, reason = %reason, "Broker refused request");
                        }
                        acks.settle(kind, pkid, result);
                    }
                    EventRoute::Infrastructure(description) => {
                        tracing::trace!(target: "mqtt_transport", "MQTT event: {}", description);
                    }
                    EventRoute::Outgoing => {}
                },
                Err(e) => {
                    // rumqttc reports refused acknowledgements as state errors
                    if matches!(e, ConnectionError::MqttState(_)) {
                        error!(client_id = %client_id, error = %e, "MQTT protocol error, ending session");
                    }
                    end_reason = e.to_string();
                    acks.fail_all(&end_reason);
                    let _ = events.send(TransportEvent::Error(end_reason.clone())).await;
                    break;
                }
            }
        }
        acks.fail_all(&end_reason);
        debug!(client_id = %client_id, "MQTT event loop stopped");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let (client, event_loop) = self.create_connection()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        info!(
            client_id = %self.client_id,
            broker = %redact_broker_url(&self.config.broker.url),
            "Opening MQTT session"
        );

        let acks = Arc::new(PendingAcks::new());
        let event_loop_handle = tokio::spawn(Self::drive_event_loop(
            self.client_id.clone(),
            event_loop,
            events_tx,
            acks.clone(),
        ));

        let previous = self.session.lock().await.replace(Session {
            client,
            acks,
            event_loop_handle,
        });
        if let Some(previous) = previous {
            previous.event_loop_handle.abort();
            previous.acks.fail_all("session replaced");
        }

        Ok(events_rx)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()));

        let mut handle = session.event_loop_handle;
        if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
            warn!("MQTT event loop didn't stop gracefully, forcing abort");
            handle.abort();
        }
        session.acks.fail_all("session closed");

        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(RequestKind::Publish, |client| async move {
            client.publish(topic, to_mqtt_qos(qos), false, payload).await
        })
        .await
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        let pattern = pattern.to_string();
        self.request(RequestKind::Subscribe, |client| async move {
            client.subscribe(pattern, to_mqtt_qos(qos)).await
        })
        .await
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let pattern = pattern.to_string();
        self.request(RequestKind::Unsubscribe, |client| async move {
            client.unsubscribe(pattern).await
        })
        .await
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Can't await in Drop; just make sure the polling task doesn't outlive us
        if let Ok(mut guard) = self.session.try_lock() {
            if let Some(session) = guard.take() {
                session.event_loop_handle.abort();
                session.acks.fail_all("transport dropped");
            }
        }
    }
}
