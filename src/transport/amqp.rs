#![forbid(unsafe_code)]

use crate::endpoint::EndpointConfig;
use crate::transport::{DeliveryAcker, InFlightMessage, PublishChannel, QueueConsumer, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_executor_trait::Tokio as TokioExecutor;
use uuid::Uuid;

/// Connection factory shared by the consumer and publisher sides.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    url: String,
    connect_timeout: Duration,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Connection, TransportError> {
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());
        match timeout(self.connect_timeout, Connection::connect(&self.url, properties)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(err)) => Err(TransportError::new(format!("failed to connect: {err}"))),
            Err(_) => Err(TransportError::new(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}

struct LapinAcker {
    channel: Channel,
    delivery_tag: u64,
}

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.channel
            .basic_ack(self.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|err| TransportError::new(format!("ack failed: {err}")))
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };
        self.channel
            .basic_nack(self.delivery_tag, options)
            .await
            .map_err(|err| TransportError::new(format!("nack failed: {err}")))
    }
}

/// Lapin-backed queue subscription with manual acks and internal reconnect.
pub struct LapinQueueConsumer {
    connector: AmqpConnector,
    binding: Option<Binding>,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
}

#[derive(Clone)]
struct Binding {
    queue: String,
    endpoint: EndpointConfig,
}

impl LapinQueueConsumer {
    pub fn new(connector: AmqpConnector) -> Self {
        Self {
            connector,
            binding: None,
            connection: None,
            channel: None,
            consumer: None,
        }
    }

    async fn establish(&mut self) -> Result<(), TransportError> {
        let binding = self
            .binding
            .clone()
            .ok_or_else(|| TransportError::new("consumer not opened"))?;

        let connection = self.connector.connect().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| TransportError::new(format!("failed to open channel: {err}")))?;

        let declare = QueueDeclareOptions {
            durable: binding.endpoint.durable(),
            ..QueueDeclareOptions::default()
        };
        channel
            .queue_declare(&binding.queue, declare, FieldTable::default())
            .await
            .map_err(|err| {
                TransportError::new(format!(
                    "failed to declare queue `{}`: {err}",
                    binding.queue
                ))
            })?;

        let prefetch = binding.endpoint.prefetch();
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|err| {
                TransportError::new(format!(
                    "failed to configure prefetch (prefetch={prefetch}): {err}"
                ))
            })?;

        let consumer_tag = format!("herald-{}-{}", binding.queue, Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &binding.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                TransportError::new(format!(
                    "failed to start consumer on queue `{}`: {err}",
                    binding.queue
                ))
            })?;

        self.connection = Some(connection);
        self.channel = Some(channel);
        self.consumer = Some(consumer);
        Ok(())
    }

    fn convert(channel: &Channel, delivery: lapin::message::Delivery) -> InFlightMessage {
        let acker: Arc<dyn DeliveryAcker> = Arc::new(LapinAcker {
            channel: channel.clone(),
            delivery_tag: delivery.delivery_tag,
        });
        InFlightMessage::new(
            delivery.data,
            delivery.routing_key.to_string(),
            delivery.delivery_tag,
            delivery.redelivered,
            acker,
        )
    }
}

#[async_trait]
impl QueueConsumer for LapinQueueConsumer {
    async fn open(
        &mut self,
        queue: &str,
        endpoint: &EndpointConfig,
    ) -> Result<(), TransportError> {
        self.binding = Some(Binding {
            queue: queue.to_string(),
            endpoint: *endpoint,
        });
        self.establish().await
    }

    async fn next_delivery(&mut self) -> Result<Option<InFlightMessage>, TransportError> {
        loop {
            let channel = self
                .channel
                .clone()
                .ok_or_else(|| TransportError::new("consumer not opened"))?;
            let consumer = self
                .consumer
                .as_mut()
                .ok_or_else(|| TransportError::new("consumer not opened"))?;

            match consumer.next().await {
                Some(Ok(delivery)) => return Ok(Some(Self::convert(&channel, delivery))),
                Some(Err(err)) => {
                    tracing::warn!(
                        target: "herald::amqp",
                        event = "consumer_stream_error",
                        error = %err,
                        "consumer stream error; attempting reconnect"
                    );
                    self.establish().await?;
                }
                None => {
                    tracing::warn!(
                        target: "herald::amqp",
                        event = "consumer_stream_ended",
                        "consumer stream ended; attempting reconnect"
                    );
                    self.establish().await?;
                }
            }
        }
    }
}

/// Destination queue declared when the publish channel (re)connects.
#[derive(Clone, Debug)]
pub struct DestinationSpec {
    pub queue: String,
    pub durable: bool,
}

/// Confirm-mode publish channel. The connection is established lazily and
/// dropped on the first failed send so the next call dials again; each `send`
/// stays a single wire attempt.
pub struct LapinPublishChannel {
    connector: AmqpConnector,
    destination: Option<DestinationSpec>,
    channel: tokio::sync::Mutex<Option<(Connection, Channel)>>,
}

impl LapinPublishChannel {
    pub fn new(connector: AmqpConnector, destination: Option<DestinationSpec>) -> Self {
        Self {
            connector,
            destination,
            channel: tokio::sync::Mutex::new(None),
        }
    }

    async fn establish(&self) -> Result<(Connection, Channel), TransportError> {
        let connection = self.connector.connect().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| TransportError::new(format!("failed to open channel: {err}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| {
                TransportError::new(format!("failed to enable publisher confirms: {err}"))
            })?;

        if let Some(destination) = &self.destination {
            let declare = QueueDeclareOptions {
                durable: destination.durable,
                ..QueueDeclareOptions::default()
            };
            channel
                .queue_declare(&destination.queue, declare, FieldTable::default())
                .await
                .map_err(|err| {
                    TransportError::new(format!(
                        "failed to declare destination `{}`: {err}",
                        destination.queue
                    ))
                })?;
        }

        Ok((connection, channel))
    }
}

#[async_trait]
impl PublishChannel for LapinPublishChannel {
    async fn send(
        &self,
        destination: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<(), TransportError> {
        let mut guard = self.channel.lock().await;

        if guard.is_none() {
            *guard = Some(self.establish().await?);
        }
        let (_, channel) = guard.as_ref().expect("channel present after establish");

        let properties =
            BasicProperties::default().with_content_type(ShortString::from(content_type));

        let result = async {
            let confirm = channel
                .basic_publish(
                    "",
                    destination,
                    BasicPublishOptions::default(),
                    payload,
                    properties,
                )
                .await
                .map_err(|err| TransportError::new(format!("publish failed: {err}")))?;

            let confirmation = confirm
                .await
                .map_err(|err| TransportError::new(format!("publish confirm failed: {err}")))?;

            if matches!(confirmation, Confirmation::Nack(_)) {
                return Err(TransportError::new("broker nacked publish"));
            }

            Ok(())
        }
        .await;

        // A failed send drops the cached channel so the next call dials again.
        if result.is_err() {
            *guard = None;
        }

        result
    }
}
