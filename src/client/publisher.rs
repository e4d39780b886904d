//! Outbound publishing

use super::connection::ConnectionManager;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{topics, QoS};
use crate::transport::Transport;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Serializes payloads and hands them to the connection's transport
///
/// Publishing requires an established session. Nothing is queued while the
/// client is disconnected or reconnecting.
pub struct PublishGateway<T: Transport> {
    connection: Arc<ConnectionManager<T>>,
    default_qos: QoS,
}

impl<T: Transport> PublishGateway<T> {
    pub fn new(connection: Arc<ConnectionManager<T>>, default_qos: QoS) -> Self {
        Self {
            connection,
            default_qos,
        }
    }

    pub fn default_qos(&self) -> QoS {
        self.default_qos
    }

    /// Publish `payload` as JSON with the default QoS
    pub async fn publish<P: Serialize + ?Sized>(&self, topic: &str, payload: &P) -> ClientResult<()> {
        self.publish_with_qos(topic, payload, self.default_qos).await
    }

    /// Publish `payload` as JSON
    pub async fn publish_with_qos<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &P,
        qos: QoS,
    ) -> ClientResult<()> {
        topics::validate_topic(topic)?;
        self.connection.ensure_connected()?;

        let bytes = serde_json::to_vec(payload).map_err(ClientError::SerializationError)?;
        self.send(topic, bytes, qos).await
    }

    /// Publish pre-encoded bytes unchanged
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> ClientResult<()> {
        topics::validate_topic(topic)?;
        self.connection.ensure_connected()?;
        self.send(topic, payload, qos).await
    }

    async fn send(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> ClientResult<()> {
        let size = payload.len();
        self.connection
            .send(topic, payload, qos)
            .await
            .map_err(|source| ClientError::PublishFailed {
                topic: topic.to_string(),
                source,
            })?;

        debug!(topic, size, ?qos, "Published message");
        Ok(())
    }
}
