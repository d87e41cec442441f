use crate::domain::{DomainEvent, CONTENT_TYPE_JSON};
use crate::error::{Error, Result};
use crate::telemetry::runtime_counters;
use crate::transport::PublishChannel;
use std::sync::Arc;

/// Publishes serialized domain events to a named destination. Stateless
/// beyond the underlying channel handle: one call is one wire attempt, and
/// retry/backoff belongs to the caller.
pub struct EventPublisher {
    channel: Arc<dyn PublishChannel>,
    destination: String,
}

impl EventPublisher {
    pub fn new(channel: Arc<dyn PublishChannel>, destination: impl Into<String>) -> Self {
        Self {
            channel,
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;

        match self
            .channel
            .send(&self.destination, &payload, CONTENT_TYPE_JSON)
            .await
        {
            Ok(()) => {
                runtime_counters().inc_publish_success();
                tracing::info!(
                    target: "herald::publish",
                    event = "event_published",
                    destination = %self.destination,
                    event_id = %event.id,
                    kind = %event.kind,
                    bytes = payload.len() as u64,
                );
                Ok(())
            }
            Err(err) => {
                runtime_counters().inc_publish_failure();
                tracing::error!(
                    target: "herald::publish",
                    event = "publish_failed",
                    destination = %self.destination,
                    event_id = %event.id,
                    kind = %event.kind,
                    error = %err,
                );
                Err(Error::publish(&self.destination, err))
            }
        }
    }
}
