use async_trait::async_trait;
use herald::domain::DomainEvent;
use herald::error::Error;
use herald::publisher::EventPublisher;
use herald::transport::{PublishChannel, TransportError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

struct RecordingChannel {
    attempts: AtomicU32,
    sent: Mutex<Vec<(String, Vec<u8>, String)>>,
    available: bool,
}

impl RecordingChannel {
    fn new(available: bool) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            available,
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishChannel for RecordingChannel {
    async fn send(
        &self,
        destination: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(TransportError::new("connection refused"));
        }
        self.sent.lock().unwrap().push((
            destination.to_string(),
            payload.to_vec(),
            content_type.to_string(),
        ));
        Ok(())
    }
}

#[tokio::test]
async fn publish_serializes_the_event_to_the_destination() {
    let channel = Arc::new(RecordingChannel::new(true));
    let publisher = EventPublisher::new(
        Arc::clone(&channel) as Arc<dyn PublishChannel>,
        "event-received",
    );

    let event = DomainEvent::new("order-submitted", json!({"order_id": 7}));
    publisher.publish(&event).await.unwrap();

    let sent = channel.sent.lock().unwrap();
    let (destination, payload, content_type) = sent.first().unwrap();
    assert_eq!(destination, "event-received");
    assert_eq!(content_type, "application/json");

    let decoded = DomainEvent::from_bytes(payload).unwrap();
    assert_eq!(decoded, event);
}

#[tokio::test]
async fn outage_surfaces_a_publish_error_after_exactly_one_attempt() {
    let channel = Arc::new(RecordingChannel::new(false));
    let publisher = EventPublisher::new(
        Arc::clone(&channel) as Arc<dyn PublishChannel>,
        "event-received",
    );

    let event = DomainEvent::new("order-submitted", json!({"order_id": 7}));
    let err = publisher.publish(&event).await.unwrap_err();

    match err {
        Error::Publish {
            destination,
            reason,
        } => {
            assert_eq!(destination, "event-received");
            assert!(reason.contains("connection refused"));
        }
        other => panic!("expected a publish error, got {other}"),
    }

    assert_eq!(channel.attempts(), 1, "no internal retry");
    assert!(channel.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn each_call_is_an_independent_attempt() {
    let channel = Arc::new(RecordingChannel::new(false));
    let publisher = EventPublisher::new(
        Arc::clone(&channel) as Arc<dyn PublishChannel>,
        "event-received",
    );

    let event = DomainEvent::new("order-submitted", json!({}));
    for expected in 1..=3 {
        publisher.publish(&event).await.unwrap_err();
        assert_eq!(channel.attempts(), expected);
    }
}
