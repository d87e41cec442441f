use crate::health::check::{CheckResult, CheckTags, HealthCheck, HealthStatus};
use crate::telemetry::runtime_counters;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health check `{name}` is already registered")]
    DuplicateName { name: String },
}

/// One evaluated check inside an [`AggregateReport`].
#[derive(Clone, Debug)]
pub struct CheckEntry {
    pub name: String,
    pub tags: CheckTags,
    pub result: CheckResult,
}

/// Folded outcome of evaluating every check matching a tag filter.
#[derive(Clone, Debug)]
pub struct AggregateReport {
    pub status: HealthStatus,
    pub entries: Vec<CheckEntry>,
    pub evaluated_at: DateTime<Utc>,
}

impl AggregateReport {
    pub fn is_passing(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Name-keyed map of checks. Registration happens before the app starts and
/// the map is never mutated afterwards, so concurrent evaluation needs no
/// locking beyond what each check does internally.
#[derive(Default)]
pub struct HealthRegistry {
    checks: BTreeMap<String, Box<dyn HealthCheck>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: Box<dyn HealthCheck>) -> Result<(), HealthError> {
        let name = check.name().to_string();
        if self.checks.contains_key(&name) {
            return Err(HealthError::DuplicateName { name });
        }
        self.checks.insert(name, check);
        Ok(())
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Runs every check whose tag set intersects `filter`, concurrently and
    /// in no guaranteed order. A check returning `Err` is captured as an
    /// Unhealthy entry carrying the error message; siblings always run to
    /// completion.
    pub async fn evaluate(&self, filter: CheckTags) -> AggregateReport {
        runtime_counters().inc_health_evaluations();

        let selected: Vec<(&String, &Box<dyn HealthCheck>)> = self
            .checks
            .iter()
            .filter(|(_, check)| check.tags().intersects(filter))
            .collect();

        let evaluations = selected.iter().map(|(name, check)| {
            let name = name.as_str();
            async move {
                let tags = check.tags();
                let result = match check.evaluate().await {
                    Ok(result) => result,
                    Err(err) => CheckResult::unhealthy(err.to_string()),
                };
                CheckEntry {
                    name: name.to_string(),
                    tags,
                    result,
                }
            }
        });

        let entries = join_all(evaluations).await;

        let status = entries
            .iter()
            .map(|entry| entry.result.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        for entry in &entries {
            if entry.result.status != HealthStatus::Healthy {
                tracing::warn!(
                    target: "herald::health",
                    event = "check_not_healthy",
                    check = %entry.name,
                    status = entry.result.status.as_str(),
                    description = entry.result.description.as_deref().unwrap_or(""),
                );
            }
        }

        AggregateReport {
            status,
            entries,
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::health::check::CheckTag;
    use async_trait::async_trait;

    struct StaticCheck {
        name: &'static str,
        tags: CheckTags,
        status: HealthStatus,
    }

    #[async_trait]
    impl HealthCheck for StaticCheck {
        fn name(&self) -> &str {
            self.name
        }

        fn tags(&self) -> CheckTags {
            self.tags
        }

        async fn evaluate(&self) -> Result<CheckResult> {
            Ok(match self.status {
                HealthStatus::Healthy => CheckResult::healthy(),
                HealthStatus::Degraded => CheckResult::degraded("partial"),
                HealthStatus::Unhealthy => CheckResult::unhealthy("down"),
            })
        }
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut registry = HealthRegistry::new();
        registry
            .register(Box::new(StaticCheck {
                name: "broker",
                tags: CheckTags::READINESS,
                status: HealthStatus::Healthy,
            }))
            .unwrap();

        let err = registry
            .register(Box::new(StaticCheck {
                name: "broker",
                tags: CheckTags::LIVENESS,
                status: HealthStatus::Healthy,
            }))
            .unwrap_err();
        assert!(matches!(err, HealthError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn empty_filter_match_aggregates_healthy() {
        let mut registry = HealthRegistry::new();
        registry
            .register(Box::new(StaticCheck {
                name: "broker",
                tags: CheckTags::READINESS,
                status: HealthStatus::Unhealthy,
            }))
            .unwrap();

        let report = registry.evaluate(CheckTags::from(CheckTag::Liveness)).await;
        assert!(report.entries.is_empty());
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn aggregate_takes_worst_status() {
        let mut registry = HealthRegistry::new();
        for (name, status) in [
            ("a", HealthStatus::Healthy),
            ("b", HealthStatus::Degraded),
            ("c", HealthStatus::Healthy),
        ] {
            registry
                .register(Box::new(StaticCheck {
                    name,
                    tags: CheckTags::READINESS,
                    status,
                }))
                .unwrap();
        }

        let report = registry.evaluate(CheckTags::READINESS).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.entries.len(), 3);
        assert!(report.is_passing());
    }
}
