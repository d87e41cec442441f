#![allow(dead_code)]

use async_trait::async_trait;
use herald::endpoint::EndpointConfig;
use herald::transport::{DeliveryAcker, InFlightMessage, QueueConsumer, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Records how every delivery was settled by the dispatcher.
#[derive(Default)]
pub struct AckLog {
    pub acked: Mutex<Vec<u64>>,
    pub dead_lettered: Mutex<Vec<u64>>,
    pub requeued: Mutex<Vec<u64>>,
    pub opened: Mutex<Option<(String, EndpointConfig)>>,
}

impl AckLog {
    pub fn acked_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn dead_lettered_tags(&self) -> Vec<u64> {
        self.dead_lettered.lock().unwrap().clone()
    }

    pub fn requeued_tags(&self) -> Vec<u64> {
        self.requeued.lock().unwrap().clone()
    }
}

struct ScriptedAcker {
    tag: u64,
    log: Arc<AckLog>,
}

#[async_trait]
impl DeliveryAcker for ScriptedAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.log.acked.lock().unwrap().push(self.tag);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        if requeue {
            self.log.requeued.lock().unwrap().push(self.tag);
        } else {
            self.log.dead_lettered.lock().unwrap().push(self.tag);
        }
        Ok(())
    }
}

/// In-memory consumer that replays a scripted burst of payloads, then idles.
pub struct ScriptedConsumer {
    payloads: VecDeque<Vec<u8>>,
    next_tag: u64,
    log: Arc<AckLog>,
}

impl ScriptedConsumer {
    pub fn new(payloads: Vec<Vec<u8>>, log: Arc<AckLog>) -> Self {
        Self {
            payloads: payloads.into(),
            next_tag: 0,
            log,
        }
    }
}

#[async_trait]
impl QueueConsumer for ScriptedConsumer {
    async fn open(
        &mut self,
        queue: &str,
        endpoint: &EndpointConfig,
    ) -> Result<(), TransportError> {
        *self.log.opened.lock().unwrap() = Some((queue.to_string(), *endpoint));
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<InFlightMessage>, TransportError> {
        let Some(payload) = self.payloads.pop_front() else {
            return Ok(None);
        };

        self.next_tag += 1;
        let acker = Arc::new(ScriptedAcker {
            tag: self.next_tag,
            log: Arc::clone(&self.log),
        });
        Ok(Some(InFlightMessage::new(
            payload,
            "scripted",
            self.next_tag,
            false,
            acker,
        )))
    }
}
