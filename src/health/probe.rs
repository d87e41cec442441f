use crate::error::Result;
use crate::health::check::{CheckResult, CheckTags, HealthCheck};
use async_trait::async_trait;
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_executor_trait::Tokio as TokioExecutor;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimal handshake capability the connectivity probe needs from a broker
/// client. Implementations must release any acquired resource before
/// returning, on every exit path.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn handshake(&self) -> Result<()>;
}

/// Opens a fresh AMQP connection and closes it again. Nothing is kept alive
/// between evaluations.
pub struct LapinProbeTransport {
    url: String,
}

impl LapinProbeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ProbeTransport for LapinProbeTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn handshake(&self) -> Result<()> {
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());
        let connection = Connection::connect(&self.url, properties).await?;
        if let Err(err) = connection.close(200, "connectivity probe complete").await {
            tracing::debug!(
                target: "herald::health",
                event = "probe_close_failed",
                error = %err,
                "probe connection close failed after successful handshake"
            );
        }
        Ok(())
    }
}

/// Readiness-tagged check that verifies broker reachability under a bounded
/// timeout. Reports Healthy/Unhealthy; Degraded is reserved for transports
/// that surface broker-side warnings, which the AMQP client does not.
pub struct BrokerConnectivityProbe {
    name: String,
    tags: CheckTags,
    transport: Arc<dyn ProbeTransport>,
    timeout: Duration,
}

impl BrokerConnectivityProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, timeout: Duration) -> Self {
        Self {
            name: "rabbitmq".to_string(),
            tags: CheckTags::READINESS,
            transport,
            timeout,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tags(mut self, tags: CheckTags) -> Self {
        self.tags = tags;
        self
    }
}

#[async_trait]
impl HealthCheck for BrokerConnectivityProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> CheckTags {
        self.tags
    }

    async fn evaluate(&self) -> Result<CheckResult> {
        let endpoint = self.transport.endpoint().to_string();
        match timeout(self.timeout, self.transport.handshake()).await {
            Ok(Ok(())) => Ok(CheckResult::healthy()),
            Ok(Err(err)) => Ok(CheckResult::unhealthy(format!(
                "broker handshake failed: {err}"
            ))),
            Err(_) => {
                tracing::warn!(
                    target: "herald::health",
                    event = "probe_timeout",
                    check = %self.name,
                    endpoint = %endpoint,
                    timeout_ms = self.timeout.as_millis() as u64,
                );
                Ok(CheckResult::unhealthy(format!(
                    "broker handshake timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}
