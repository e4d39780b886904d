//! Messaging client façade
//!
//! [`MessagingClient`] composes the connection manager, the handler registry
//! and the publish gateway into the public surface: connect, disconnect,
//! publish, subscribe, unsubscribe and handler registration.

use super::connection::ConnectionManager;
use super::publisher::PublishGateway;
use super::reconnect::ReconnectPolicy;
use super::registry::{run_dispatcher, HandlerId, HandlerRegistry, HandlerResult, MessageHandler};
use super::state::{ConnectionEvent, ConnectionState, ConnectionStats};
use crate::client_span;
use crate::config::{ClientConfig, ConnectionSection};
use crate::error::ClientResult;
use crate::protocol::{topics, InboundMessage, Message, QoS, Received};
use crate::transport::{MqttTransport, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

/// Inbound messages buffered between the transport and the dispatcher
const DISPATCH_QUEUE_CAPACITY: usize = 256;

/// Dispatcher task, started on the first `connect()`
enum Dispatcher {
    Idle(mpsc::Receiver<InboundMessage>),
    Running(JoinHandle<()>),
}

pub struct MessagingClient<T: Transport> {
    service_name: String,
    client_id: String,
    connection: Arc<ConnectionManager<T>>,
    publisher: PublishGateway<T>,
    registry: Arc<HandlerRegistry>,
    default_qos: QoS,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl MessagingClient<MqttTransport> {
    /// Build an MQTT-backed client from a validated configuration
    pub fn from_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let client_id = config.resolve_client_id();
        let connection = config.connection.clone();
        let service_name = config.service.name.clone();
        let transport = MqttTransport::new(client_id.clone(), config)?;
        Ok(Self::new(service_name, client_id, transport, &connection))
    }
}

impl<T: Transport> MessagingClient<T> {
    pub fn new(
        service_name: impl Into<String>,
        client_id: impl Into<String>,
        transport: T,
        connection: &ConnectionSection,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        let connection_manager = Arc::new(ConnectionManager::new(
            transport,
            ReconnectPolicy::from(connection),
            inbound_tx,
        ));

        Self {
            service_name: service_name.into(),
            client_id: client_id.into(),
            publisher: PublishGateway::new(connection_manager.clone(), connection.default_qos),
            connection: connection_manager,
            registry: Arc::new(HandlerRegistry::new()),
            default_qos: connection.default_qos,
            dispatcher: Mutex::new(Some(Dispatcher::Idle(inbound_rx))),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn default_qos(&self) -> QoS {
        self.default_qos
    }

    /// Connect to the broker
    ///
    /// Suspends until the first session is acknowledged or the retry budget
    /// runs out.
    pub async fn connect(&self) -> ClientResult<()> {
        self.start_dispatcher();
        let span = client_span!(client_id = %self.client_id, operation = "connect");
        self.connection.connect().instrument(span).await?;
        info!(client_id = %self.client_id, service = %self.service_name, "Messaging client connected");
        Ok(())
    }

    fn start_dispatcher(&self) {
        let mut dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        *dispatcher = match dispatcher.take() {
            Some(Dispatcher::Idle(inbound_rx)) => Some(Dispatcher::Running(tokio::spawn(
                run_dispatcher(self.registry.clone(), inbound_rx),
            ))),
            other => other,
        };
    }

    /// Disconnect, dropping every handler registration and subscription
    pub async fn disconnect(&self) -> ClientResult<()> {
        let span = client_span!(client_id = %self.client_id, operation = "disconnect");
        self.connection.disconnect().instrument(span).await?;
        self.registry.clear().await;
        Ok(())
    }

    /// Publish a JSON-serializable payload with the default QoS
    pub async fn publish<P: Serialize + ?Sized>(&self, topic: &str, payload: &P) -> ClientResult<()> {
        self.publisher.publish(topic, payload).await
    }

    pub async fn publish_with_qos<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &P,
        qos: QoS,
    ) -> ClientResult<()> {
        self.publisher.publish_with_qos(topic, payload, qos).await
    }

    /// Publish pre-encoded bytes
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> ClientResult<()> {
        self.publisher.publish_raw(topic, payload, qos).await
    }

    /// Subscribe to a pattern on the transport
    pub async fn subscribe(&self, pattern: &str, qos: QoS) -> ClientResult<()> {
        topics::validate_pattern(pattern)?;
        self.connection.subscribe(pattern, qos).await
    }

    /// Unsubscribe and drop every handler registered under `pattern`
    pub async fn unsubscribe(&self, pattern: &str) -> ClientResult<()> {
        self.connection.unsubscribe(pattern).await?;
        self.registry.remove_pattern(pattern).await;
        Ok(())
    }

    /// Register a handler for messages matching `pattern`
    ///
    /// The first handler for a pattern also subscribes to it: immediately
    /// when connected, otherwise on the next acknowledged session. A failed
    /// immediate subscription is returned as an error, but the handler stays
    /// registered and the subscription is retried on reconnection.
    pub async fn on_message<H: MessageHandler>(&self, pattern: &str, handler: H) -> ClientResult<HandlerId> {
        let registration = self.registry.register(pattern, Arc::new(handler)).await?;

        if registration.newly_created {
            self.connection.track_subscription(pattern, self.default_qos);
            match self.connection.subscribe(pattern, self.default_qos).await {
                Ok(()) => {}
                Err(e) if e.is_not_connected() => {
                    debug!(pattern, "Subscription deferred until connected");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(registration.id)
    }

    /// Register a handler receiving payloads decoded into `M`
    ///
    /// Payloads that don't decode into `M` are delivered as [`Received::Opaque`].
    pub async fn on_typed<M, F, Fut>(&self, pattern: &str, handler: F) -> ClientResult<HandlerId>
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(String, Received<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_message(pattern, move |message: Message| {
            let handler = handler.clone();
            async move { (*handler)(message.topic, Received::from_payload(message.payload)).await }
        })
        .await
    }

    /// Remove one handler; the pattern stays subscribed until `unsubscribe`
    pub async fn remove_handler(&self, pattern: &str, id: HandlerId) -> bool {
        self.registry.unregister(pattern, id).await
    }

    pub async fn registered_patterns(&self) -> Vec<String> {
        self.registry.patterns().await
    }

    pub async fn handler_count(&self, pattern: &str) -> usize {
        self.registry.handler_count(pattern).await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.events()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }
}

impl<T: Transport> Drop for MessagingClient<T> {
    fn drop(&mut self) {
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(Dispatcher::Running(handle)) = dispatcher.take() {
                handle.abort();
            }
        }
    }
}
