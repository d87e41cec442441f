use crate::endpoint::EndpointConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

pub mod amqp;

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

#[derive(Debug, Clone)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Acknowledgement handle for one delivery. Safe to move into the worker that
/// owns the message; acking or rejecting consumes the broker's unacked credit.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;

    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;
}

/// A message pulled from the broker, owned exclusively by the worker that
/// dequeued it until acknowledged or rejected.
pub struct InFlightMessage {
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
    acker: Arc<dyn DeliveryAcker>,
}

impl InFlightMessage {
    pub fn new(
        payload: Vec<u8>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Arc<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            payload,
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered,
            received_at: Utc::now(),
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.acker.nack(requeue).await
    }
}

/// Subscription seam between the dispatcher and the broker client library.
#[async_trait]
pub trait QueueConsumer: Send + 'static {
    /// Provisions the subscription: declares the source with the endpoint's
    /// durability, applies the prefetch window, and starts consuming.
    async fn open(&mut self, queue: &str, endpoint: &EndpointConfig)
        -> Result<(), TransportError>;

    /// Waits for the next delivery. `Ok(None)` means the stream is currently
    /// idle/closed without error; implementations handle their own
    /// reconnection.
    async fn next_delivery(&mut self) -> Result<Option<InFlightMessage>, TransportError>;
}

/// Publish seam; a single `send` is a single wire attempt.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<(), TransportError>;
}
