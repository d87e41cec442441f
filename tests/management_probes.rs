use async_trait::async_trait;
use herald::app_state::{AppState, ServiceRole};
use herald::config::{HealthConfig, ManagementConfig};
use herald::domain::DomainEvent;
use herald::error::Result;
use herald::health::{
    CheckResult, CheckTags, HealthCheck, HealthRegistry, HealthStatus, LivenessGate,
    ReadinessGate,
};
use herald::management::ManagementServer;
use herald::publisher::EventPublisher;
use herald::transport::{PublishChannel, TransportError};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn reserve_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

struct StaticCheck {
    name: String,
    tags: CheckTags,
    status: HealthStatus,
}

#[async_trait]
impl HealthCheck for StaticCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> CheckTags {
        self.tags
    }

    async fn evaluate(&self) -> Result<CheckResult> {
        Ok(match self.status {
            HealthStatus::Healthy => CheckResult::healthy(),
            HealthStatus::Degraded => CheckResult::degraded("degraded"),
            HealthStatus::Unhealthy => CheckResult::unhealthy("broker unreachable"),
        })
    }
}

struct RecordingChannel {
    sent: Mutex<Vec<Vec<u8>>>,
    available: bool,
}

#[async_trait]
impl PublishChannel for RecordingChannel {
    async fn send(
        &self,
        _destination: &str,
        payload: &[u8],
        _content_type: &str,
    ) -> std::result::Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::new("connection refused"));
        }
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

fn state_with_checks(
    role: ServiceRole,
    publisher: Option<Arc<EventPublisher>>,
    broker_status: HealthStatus,
) -> AppState {
    let mut registry = HealthRegistry::new();
    registry
        .register(Box::new(StaticCheck {
            name: "rabbitmq".to_string(),
            tags: CheckTags::READINESS,
            status: broker_status,
        }))
        .unwrap();
    registry
        .register(Box::new(StaticCheck {
            name: "worker-loop".to_string(),
            tags: CheckTags::LIVENESS,
            status: HealthStatus::Healthy,
        }))
        .unwrap();

    let registry = Arc::new(registry);
    AppState {
        role,
        registry: Arc::clone(&registry),
        readiness: ReadinessGate::new(Arc::clone(&registry)),
        liveness: LivenessGate::new(registry),
        publisher,
        dispatcher_state: None,
    }
}

async fn start_server(
    state: AppState,
) -> (String, CancellationToken, JoinHandle<Result<()>>) {
    let port = reserve_port().expect("reserve management port");
    let management = ManagementConfig {
        host: "127.0.0.1".to_string(),
        port,
    };
    let health = HealthConfig::default();
    let server = ManagementServer::build(&management, &health).expect("build management server");

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let task = tokio::spawn(async move { server.serve(state, shutdown_clone).await });

    // Give the listener a brief moment to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), shutdown, task)
}

#[tokio::test(flavor = "multi_thread")]
async fn ready_lists_readiness_checks_and_forbids_caching() {
    let state = state_with_checks(ServiceRole::Consumer, None, HealthStatus::Healthy);
    let (base_url, shutdown, task) = start_server(state).await;

    let response = reqwest::get(format!("{base_url}/health/ready"))
        .await
        .expect("poll readiness");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|value| value.to_str().ok()),
        Some("no-store")
    );

    let body: Value = response.json().await.expect("readiness body");
    assert_eq!(body["status"], "HEALTHY");
    let checks = body["checks"].as_array().expect("checks array");
    assert_eq!(checks.len(), 1, "only readiness-tagged checks are evaluated");
    assert_eq!(checks[0]["name"], "rabbitmq");
    assert_eq!(checks[0]["tags"], json!(["READINESS"]));
    assert_eq!(checks[0]["status"], "HEALTHY");

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unhealthy_broker_turns_both_probes_to_503() {
    let state = state_with_checks(ServiceRole::Consumer, None, HealthStatus::Unhealthy);
    let (base_url, shutdown, task) = start_server(state).await;

    let ready = reqwest::get(format!("{base_url}/health/ready"))
        .await
        .expect("poll readiness");
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);

    // The liveness filter includes readiness-tagged checks.
    let live = reqwest::get(format!("{base_url}/health/live"))
        .await
        .expect("poll liveness");
    assert_eq!(live.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = live.json().await.expect("liveness body");
    assert_eq!(body["status"], "UNHEALTHY");
    let checks = body["checks"].as_array().expect("checks array");
    assert_eq!(checks.len(), 2, "liveness evaluates both tag scopes");

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn status_page_reports_role_and_counters() {
    let state = state_with_checks(ServiceRole::Consumer, None, HealthStatus::Degraded);
    let (base_url, shutdown, task) = start_server(state).await;

    let response = reqwest::get(format!("{base_url}/health/status"))
        .await
        .expect("poll status");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("status body");
    assert_eq!(body["role"], "consumer");
    assert_eq!(body["status"], "DEGRADED");
    assert!(body["counters"]["acked"].is_u64());

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn producer_accepts_events_and_surfaces_outages() {
    let channel = Arc::new(RecordingChannel {
        sent: Mutex::new(Vec::new()),
        available: true,
    });
    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&channel) as Arc<dyn PublishChannel>,
        "event-received",
    ));
    let state = state_with_checks(
        ServiceRole::Producer,
        Some(publisher),
        HealthStatus::Healthy,
    );
    let (base_url, shutdown, task) = start_server(state).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/events"))
        .json(&json!({"kind": "order-submitted", "payload": {"order_id": 7}}))
        .send()
        .await
        .expect("post event");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let sent = channel.sent.lock().unwrap();
    let event = DomainEvent::from_bytes(sent.first().expect("published payload")).unwrap();
    assert_eq!(event.kind, "order-submitted");
    assert_eq!(event.payload, json!({"order_id": 7}));
    drop(sent);

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_outage_maps_to_503() {
    let channel = Arc::new(RecordingChannel {
        sent: Mutex::new(Vec::new()),
        available: false,
    });
    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&channel) as Arc<dyn PublishChannel>,
        "event-received",
    ));
    let state = state_with_checks(
        ServiceRole::Producer,
        Some(publisher),
        HealthStatus::Healthy,
    );
    let (base_url, shutdown, task) = start_server(state).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/events"))
        .json(&json!({"kind": "order-submitted"}))
        .send()
        .await
        .expect("post event");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.expect("error body");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("event-received"));

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
