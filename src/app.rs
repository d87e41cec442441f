use crate::app_state::{AppState, ServiceRole};
use crate::config::HeraldConfig;
use crate::dispatch::{ConsumerDispatcher, EventHandler, HandlerError};
use crate::dispatch::retry::RedeliveryPolicy;
use crate::domain::DomainEvent;
use crate::endpoint::EndpointConfig;
use crate::error::{Context, Result};
use crate::health::{BrokerConnectivityProbe, HealthRegistry, LapinProbeTransport, LivenessGate, ReadinessGate};
use crate::management::ManagementServer;
use crate::publisher::EventPublisher;
use crate::transport::amqp::{AmqpConnector, DestinationSpec, LapinPublishChannel, LapinQueueConsumer};
use crate::transport::InFlightMessage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Consumer-side business handler: decodes the event envelope and records its
/// receipt. A payload that is not a valid event is a handler failure and goes
/// through the redelivery policy like any other.
pub struct EventReceivedHandler;

#[async_trait]
impl EventHandler for EventReceivedHandler {
    async fn handle(&self, message: &InFlightMessage) -> std::result::Result<(), HandlerError> {
        let event = DomainEvent::from_bytes(&message.payload)
            .map_err(|err| HandlerError::new(format!("invalid event payload: {err}")))?;

        tracing::info!(
            target: "herald::consumer",
            event = "event_received",
            event_id = %event.id,
            kind = %event.kind,
            occurred_at = %event.occurred_at.to_rfc3339(),
            redelivered = message.redelivered,
        );
        Ok(())
    }
}

pub struct HeraldApp {
    state: AppState,
    management: ManagementServer,
    dispatcher: Option<ConsumerDispatcher<LapinQueueConsumer>>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl HeraldApp {
    pub async fn initialise(config: HeraldConfig, role: ServiceRole) -> Result<Self> {
        let connector =
            AmqpConnector::new(&config.broker.url, config.broker.connect_timeout());

        let mut registry = HealthRegistry::new();
        let probe_transport = Arc::new(LapinProbeTransport::new(&config.broker.url));
        registry.register(Box::new(BrokerConnectivityProbe::new(
            probe_transport,
            config.health.probe_timeout(),
        )))?;
        let registry = Arc::new(registry);

        let management = ManagementServer::build(&config.management, &config.health)
            .context("failed to construct management server")?;

        let mut publisher = None;
        let mut dispatcher = None;
        let mut dispatcher_state = None;

        match role {
            ServiceRole::Producer => {
                let channel = LapinPublishChannel::new(
                    connector,
                    Some(DestinationSpec {
                        queue: config.broker.queue.clone(),
                        durable: config.endpoint.durable,
                    }),
                );
                publisher = Some(Arc::new(EventPublisher::new(
                    Arc::new(channel),
                    config.broker.queue.clone(),
                )));
            }
            ServiceRole::Consumer => {
                let endpoint = EndpointConfig::from_settings(&config.endpoint)?;
                let consumer = LapinQueueConsumer::new(connector);
                let built = ConsumerDispatcher::new(
                    config.broker.queue.clone(),
                    endpoint,
                    consumer,
                    Arc::new(EventReceivedHandler),
                    RedeliveryPolicy::from_config(&config.retry),
                    config.app.drain_timeout(),
                );
                dispatcher_state = Some(built.state_handle());
                dispatcher = Some(built);
            }
        }

        let state = AppState {
            role,
            registry: Arc::clone(&registry),
            readiness: ReadinessGate::new(Arc::clone(&registry)),
            liveness: LivenessGate::new(registry),
            publisher,
            dispatcher_state,
        };

        Ok(Self {
            state,
            management,
            dispatcher,
            shutdown: CancellationToken::new(),
            drain_timeout: config.app.drain_timeout(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            management,
            dispatcher,
            shutdown,
            drain_timeout,
        } = self;

        let mut management_task = {
            let management_state = state.clone();
            let management_shutdown = shutdown.clone();
            tokio::spawn(async move { management.serve(management_state, management_shutdown).await })
        };

        let mut dispatcher_task = dispatcher.map(|dispatcher| {
            let dispatcher_shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(dispatcher_shutdown).await })
        });

        tracing::info!(
            role = state.role.as_str(),
            "herald service ready; press Ctrl+C to stop"
        );

        tokio::select! {
            res = &mut management_task => {
                tracing::warn!("management server task terminated unexpectedly");
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => {
                        return Err(crate::err!("management server task join error: {join_err}"))
                    }
                }
            }
            res = async {
                dispatcher_task
                    .as_mut()
                    .expect("dispatcher task guard ensures presence")
                    .await
            }, if dispatcher_task.is_some() => {
                tracing::warn!("consumer dispatcher task terminated unexpectedly");
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => {
                        return Err(crate::err!("consumer dispatcher join error: {join_err}"))
                    }
                }
                dispatcher_task = None;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }

        shutdown.cancel();

        // Hard bound above the dispatcher's own drain window so an unhealthy
        // broker cannot wedge shutdown.
        let shutdown_budget = drain_timeout + Duration::from_secs(5);

        let graceful_shutdown = async {
            if let Some(task) = dispatcher_task.as_mut() {
                match task.await {
                    Ok(result) => result?,
                    Err(join_err) => {
                        if !join_err.is_cancelled() {
                            tracing::warn!(
                                error = %join_err,
                                "consumer dispatcher task join error during shutdown"
                            );
                        }
                    }
                }
            }

            if !management_task.is_finished() {
                management_task.abort();
            }

            Ok::<(), crate::error::Error>(())
        };

        match timeout(shutdown_budget, graceful_shutdown).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(task) = dispatcher_task.as_mut() {
                    task.abort();
                }
                management_task.abort();
                Err(crate::err!(
                    "graceful shutdown timed out after {:?}",
                    shutdown_budget
                ))
            }
        }
    }
}
