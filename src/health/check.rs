use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Verdict of a single check evaluation. Ordering is severity: a later
/// variant always dominates when folding an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckTag {
    Readiness,
    Liveness,
}

impl CheckTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckTag::Readiness => "READINESS",
            CheckTag::Liveness => "LIVENESS",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            CheckTag::Readiness => 0b01,
            CheckTag::Liveness => 0b10,
        }
    }
}

/// Set over the closed [`CheckTag`] universe. A check may carry zero, one, or
/// both tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckTags(u8);

impl CheckTags {
    pub const NONE: CheckTags = CheckTags(0);
    pub const READINESS: CheckTags = CheckTags(CheckTag::Readiness.bit());
    pub const LIVENESS: CheckTags = CheckTags(CheckTag::Liveness.bit());

    pub fn union(self, other: CheckTags) -> CheckTags {
        CheckTags(self.0 | other.0)
    }

    pub fn contains(self, tag: CheckTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn intersects(self, other: CheckTags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn labels(self) -> Vec<&'static str> {
        [CheckTag::Readiness, CheckTag::Liveness]
            .into_iter()
            .filter(|tag| self.contains(*tag))
            .map(CheckTag::as_str)
            .collect()
    }
}

impl From<CheckTag> for CheckTags {
    fn from(tag: CheckTag) -> Self {
        CheckTags(tag.bit())
    }
}

/// Produced fresh on every evaluation; never cached across polls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub description: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
            checked_at: Utc::now(),
        }
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            description: Some(description.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: Some(description.into()),
            checked_at: Utc::now(),
        }
    }
}

/// A named health check. Implementations are registered once at startup and
/// evaluated on demand; `evaluate` may perform network I/O and must bound its
/// own duration. An `Err` return is folded into an Unhealthy result by the
/// registry and never aborts sibling evaluations.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn tags(&self) -> CheckTags;

    async fn evaluate(&self) -> Result<CheckResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_total() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
    }

    #[test]
    fn tag_sets_intersect_and_label() {
        let both = CheckTags::READINESS.union(CheckTags::LIVENESS);
        assert!(both.contains(CheckTag::Readiness));
        assert!(both.contains(CheckTag::Liveness));
        assert!(both.intersects(CheckTags::LIVENESS));
        assert!(!CheckTags::READINESS.intersects(CheckTags::LIVENESS));
        assert!(!CheckTags::NONE.intersects(both));
        assert_eq!(both.labels(), vec!["READINESS", "LIVENESS"]);
    }
}
