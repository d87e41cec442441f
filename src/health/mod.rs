pub mod check;
pub mod gate;
pub mod probe;
pub mod registry;

pub use check::{CheckResult, CheckTag, CheckTags, HealthCheck, HealthStatus};
pub use gate::{LivenessGate, ReadinessGate};
pub use probe::{BrokerConnectivityProbe, LapinProbeTransport, ProbeTransport};
pub use registry::{AggregateReport, CheckEntry, HealthError, HealthRegistry};
