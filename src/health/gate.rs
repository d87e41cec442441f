use crate::health::check::CheckTags;
use crate::health::registry::{AggregateReport, HealthRegistry};
use std::sync::Arc;

/// Tag filter used by the liveness gate: the original wiring evaluates every
/// check tagged READINESS or LIVENESS, so liveness scope is a strict superset
/// of readiness scope.
fn liveness_filter() -> CheckTags {
    CheckTags::READINESS.union(CheckTags::LIVENESS)
}

/// Derived view answering "should this service receive traffic right now".
/// No caching: every call re-runs the underlying checks, so the polling
/// collaborator owns the cadence.
#[derive(Clone)]
pub struct ReadinessGate {
    registry: Arc<HealthRegistry>,
}

impl ReadinessGate {
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self { registry }
    }

    pub async fn report(&self) -> AggregateReport {
        self.registry.evaluate(CheckTags::READINESS).await
    }

    pub async fn is_ready(&self) -> bool {
        self.report().await.is_passing()
    }
}

/// Derived view answering "is this process healthy enough to keep running".
#[derive(Clone)]
pub struct LivenessGate {
    registry: Arc<HealthRegistry>,
}

impl LivenessGate {
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self { registry }
    }

    pub async fn report(&self) -> AggregateReport {
        self.registry.evaluate(liveness_filter()).await
    }

    pub async fn is_alive(&self) -> bool {
        self.report().await.is_passing()
    }
}
