use crate::endpoint::EndpointConfig;
use crate::error::Result;
use crate::telemetry::runtime_counters;
use crate::transport::{sleep_with_shutdown, InFlightMessage, QueueConsumer};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub mod retry;
pub mod slots;

use retry::{jitter_between, RedeliveryPolicy, RetryBackoff, RetrySettings};
use slots::DispatchSlots;

const IDLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl DispatcherState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatcherState::Stopped => "STOPPED",
            DispatcherState::Starting => "STARTING",
            DispatcherState::Running => "RUNNING",
            DispatcherState::Draining => "DRAINING",
        }
    }
}

/// Shared view of a dispatcher's lifecycle state.
#[derive(Clone)]
pub struct DispatcherStateHandle {
    inner: Arc<Mutex<DispatcherState>>,
}

impl DispatcherStateHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DispatcherState::Stopped)),
        }
    }

    pub fn get(&self) -> DispatcherState {
        self.inner
            .lock()
            .map(|guard| *guard)
            .unwrap_or(DispatcherState::Stopped)
    }

    fn set(&self, queue: &str, next: DispatcherState) {
        let previous = {
            let mut guard = self
                .inner
                .lock()
                .expect("dispatcher state lock poisoned");
            let previous = *guard;
            *guard = next;
            previous
        };

        if previous != next {
            tracing::info!(
                target: "herald::dispatch",
                event = "state_changed",
                queue = %queue,
                from = previous.as_str(),
                to = next.as_str(),
            );
        }
    }
}

/// Raised by business logic inside a consumer handler invocation; contained
/// by the dispatcher and fed into the redelivery policy.
#[derive(Debug, Clone)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InFlightMessage) -> std::result::Result<(), HandlerError>;
}

enum WorkerOutcome {
    Acked,
    DeadLettered(HandlerError),
    Requeued,
}

/// Pulls prefetched messages from one queue and fans them out to at most
/// `concurrency_limit` concurrent handler invocations.
pub struct ConsumerDispatcher<C: QueueConsumer> {
    queue: String,
    endpoint: EndpointConfig,
    consumer: C,
    handler: Arc<dyn EventHandler>,
    policy: RedeliveryPolicy,
    stream_retry: RetrySettings,
    slots: DispatchSlots,
    state: DispatcherStateHandle,
    drain_timeout: Duration,
}

impl<C: QueueConsumer> ConsumerDispatcher<C> {
    pub fn new(
        queue: impl Into<String>,
        endpoint: EndpointConfig,
        consumer: C,
        handler: Arc<dyn EventHandler>,
        policy: RedeliveryPolicy,
        drain_timeout: Duration,
    ) -> Self {
        let slots = DispatchSlots::new(endpoint.concurrency_limit());
        Self {
            queue: queue.into(),
            endpoint,
            consumer,
            handler,
            policy,
            stream_retry: RetrySettings::default(),
            slots,
            state: DispatcherStateHandle::new(),
            drain_timeout,
        }
    }

    pub fn state_handle(&self) -> DispatcherStateHandle {
        self.state.clone()
    }

    pub fn slots(&self) -> &DispatchSlots {
        &self.slots
    }

    /// Drives the endpoint until the shutdown token fires, then drains
    /// in-flight invocations within the configured drain timeout.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.state.set(&self.queue, DispatcherState::Starting);

        self.consumer
            .open(&self.queue, &self.endpoint)
            .await
            .map_err(|err| {
                self.state.set(&self.queue, DispatcherState::Stopped);
                crate::err!(
                    "failed to open subscription on `{}`: {err}",
                    self.queue
                )
            })?;

        tracing::info!(
            target: "herald::dispatch",
            event = "subscription_opened",
            queue = %self.queue,
            durable = self.endpoint.durable(),
            concurrency_limit = self.endpoint.concurrency_limit() as u64,
            prefetch = self.endpoint.prefetch() as u64,
        );

        self.state.set(&self.queue, DispatcherState::Running);

        let mut workers: JoinSet<()> = JoinSet::new();
        let mut stream_backoff = RetryBackoff::new(self.stream_retry.clone());

        loop {
            while workers.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.consumer.next_delivery() => match received {
                    Ok(Some(message)) => {
                        stream_backoff.on_success();

                        let Some(slot) = self.slots.acquire(&shutdown).await else {
                            if let Err(err) = message.nack(true).await {
                                tracing::warn!(
                                    target: "herald::dispatch",
                                    event = "requeue_failed",
                                    queue = %self.queue,
                                    delivery_tag = message.delivery_tag,
                                    error = %err,
                                );
                            }
                            break;
                        };

                        let handler = Arc::clone(&self.handler);
                        let policy = self.policy.clone();
                        let queue = self.queue.clone();
                        let worker_shutdown = shutdown.clone();
                        workers.spawn(async move {
                            process_message(
                                handler,
                                policy,
                                queue,
                                message,
                                worker_shutdown,
                            )
                            .await;
                            drop(slot);
                        });
                    }
                    Ok(None) => {
                        if sleep_with_shutdown(IDLE_DELAY, &shutdown).await {
                            break;
                        }
                    }
                    Err(err) => {
                        let delay = stream_backoff.on_failure();
                        let delay = jitter_between(self.stream_retry.initial(), delay);
                        tracing::error!(
                            target: "herald::dispatch",
                            event = "receive_failed",
                            queue = %self.queue,
                            error = %err,
                            retry_delay_ms = delay.as_millis() as u64,
                        );
                        if sleep_with_shutdown(delay, &shutdown).await {
                            break;
                        }
                    }
                }
            }
        }

        self.state.set(&self.queue, DispatcherState::Draining);
        drain_workers(&self.queue, &mut workers, self.drain_timeout).await;
        self.state.set(&self.queue, DispatcherState::Stopped);

        Ok(())
    }
}

async fn drain_workers(queue: &str, workers: &mut JoinSet<()>, drain_timeout: Duration) {
    if workers.is_empty() {
        return;
    }

    let inflight = workers.len() as u64;
    tracing::info!(
        target: "herald::dispatch",
        event = "drain_started",
        queue = %queue,
        inflight = inflight,
        timeout_ms = drain_timeout.as_millis() as u64,
    );

    let waited = timeout(drain_timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await;

    match waited {
        Ok(()) => {
            tracing::info!(
                target: "herald::dispatch",
                event = "drain_completed",
                queue = %queue,
            );
        }
        Err(_) => {
            let abandoned = workers.len() as u64;
            tracing::warn!(
                target: "herald::dispatch",
                event = "drain_timeout_exceeded",
                queue = %queue,
                abandoned = abandoned,
                "in-flight invocations abandoned; unacked deliveries return to the broker"
            );
            workers.shutdown().await;
        }
    }
}

/// Runs the handler for one message with bounded in-worker retries, then
/// settles the delivery: ack on success, dead-letter after the attempt limit,
/// requeue when interrupted by shutdown.
async fn process_message(
    handler: Arc<dyn EventHandler>,
    policy: RedeliveryPolicy,
    queue: String,
    message: InFlightMessage,
    shutdown: CancellationToken,
) {
    let counters = runtime_counters();
    counters.inc_deliveries_inflight();

    let mut backoff = RetryBackoff::new(policy.backoff.clone());
    let mut attempt: u32 = 0;

    let outcome = loop {
        attempt += 1;
        match handler.handle(&message).await {
            Ok(()) => break WorkerOutcome::Acked,
            Err(err) => {
                if attempt >= policy.total_invocations() {
                    break WorkerOutcome::DeadLettered(err);
                }

                counters.inc_handler_retries();
                let delay = backoff.on_failure();
                tracing::warn!(
                    target: "herald::dispatch",
                    event = "handler_retry",
                    queue = %queue,
                    delivery_tag = message.delivery_tag,
                    attempt = attempt as u64,
                    max_attempts = policy.max_attempts as u64,
                    retry_delay_ms = delay.as_millis() as u64,
                    error = %err,
                );

                if sleep_with_shutdown(delay, &shutdown).await {
                    break WorkerOutcome::Requeued;
                }
            }
        }
    };

    match outcome {
        WorkerOutcome::Acked => {
            match message.ack().await {
                Ok(()) => counters.inc_acked(),
                Err(err) => {
                    tracing::error!(
                        target: "herald::dispatch",
                        event = "ack_failed",
                        queue = %queue,
                        delivery_tag = message.delivery_tag,
                        error = %err,
                    );
                }
            }
        }
        WorkerOutcome::DeadLettered(err) => {
            let preview = crate::domain::parse_payload(&message.payload);
            tracing::error!(
                target: "herald::dispatch",
                event = "dead_lettered",
                queue = %queue,
                delivery_tag = message.delivery_tag,
                attempts = attempt as u64,
                payload_b64 = %preview.base64,
                error = %err,
            );
            match message.nack(false).await {
                Ok(()) => counters.inc_dead_lettered(),
                Err(nack_err) => {
                    tracing::error!(
                        target: "herald::dispatch",
                        event = "dead_letter_failed",
                        queue = %queue,
                        delivery_tag = message.delivery_tag,
                        error = %nack_err,
                    );
                }
            }
        }
        WorkerOutcome::Requeued => {
            match message.nack(true).await {
                Ok(()) => counters.inc_requeued(),
                Err(err) => {
                    tracing::warn!(
                        target: "herald::dispatch",
                        event = "requeue_failed",
                        queue = %queue,
                        delivery_tag = message.delivery_tag,
                        error = %err,
                    );
                }
            }
        }
    }

    counters.dec_deliveries_inflight();
}
