use crate::dispatch::DispatcherStateHandle;
use crate::health::{HealthRegistry, LivenessGate, ReadinessGate};
use crate::publisher::EventPublisher;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceRole {
    Producer,
    Consumer,
}

impl ServiceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceRole::Producer => "producer",
            ServiceRole::Consumer => "consumer",
        }
    }
}

/// Shared handles exposed to the management server.
#[derive(Clone)]
pub struct AppState {
    pub role: ServiceRole,
    pub registry: Arc<HealthRegistry>,
    pub readiness: ReadinessGate,
    pub liveness: LivenessGate,
    pub publisher: Option<Arc<EventPublisher>>,
    pub dispatcher_state: Option<DispatcherStateHandle>,
}
