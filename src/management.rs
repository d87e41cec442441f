use crate::app_state::{AppState, ServiceRole};
use crate::config::{HealthConfig, ManagementConfig};
use crate::domain::DomainEvent;
use crate::error::{Context, Result};
use crate::health::{AggregateReport, CheckTags};
use crate::telemetry::runtime_counters;
use axum::extract::Json as JsonBody;
use axum::http::{header::CACHE_CONTROL, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// HTTP surface polled by the orchestrator: readiness, liveness, and a status
/// page. In the producer role it additionally accepts events to publish.
/// Probe responses are marked non-cacheable; every poll re-runs the checks.
pub struct ManagementServer {
    addr: SocketAddr,
    readiness_path: String,
    liveness_path: String,
    ui_path: String,
}

impl ManagementServer {
    pub fn build(config: &ManagementConfig, health: &HealthConfig) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid management listen address {}:{}",
                    config.host, config.port
                )
            })?;

        Ok(Self {
            addr,
            readiness_path: health.readiness_path.clone(),
            liveness_path: health.liveness_path.clone(),
            ui_path: health.ui_path.clone(),
        })
    }

    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind management listener on {}", self.addr))?;

        let mut router = Router::new()
            .route(self.readiness_path.as_str(), get(ready))
            .route(self.liveness_path.as_str(), get(live))
            .route(self.ui_path.as_str(), get(status_report));

        if state.role == ServiceRole::Producer {
            router = router.route("/events", post(publish_event));
        }

        router = router.layer(Extension(state));

        tracing::info!(
            target: "herald::management",
            event = "listening",
            addr = %self.addr,
            readiness = %self.readiness_path,
            liveness = %self.liveness_path,
            status = %self.ui_path,
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
            .context("management server exited abnormally")?;

        Ok(())
    }
}

fn check_entries_payload(report: &AggregateReport) -> JsonValue {
    let entries: Vec<JsonValue> = report
        .entries
        .iter()
        .map(|entry| {
            json!({
                "name": entry.name,
                "tags": entry.tags.labels(),
                "status": entry.result.status.as_str(),
                "description": entry.result.description,
                "checked_at": entry.result.checked_at.to_rfc3339(),
            })
        })
        .collect();
    JsonValue::Array(entries)
}

fn probe_response(report: &AggregateReport) -> Response {
    let body = Json(json!({
        "status": report.status.as_str(),
        "checks": check_entries_payload(report),
        "evaluated_at": report.evaluated_at.to_rfc3339(),
    }));

    let status = if report.is_passing() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn ready(Extension(state): Extension<AppState>) -> Response {
    let report = state.readiness.report().await;
    probe_response(&report)
}

async fn live(Extension(state): Extension<AppState>) -> Response {
    let report = state.liveness.report().await;
    probe_response(&report)
}

async fn status_report(Extension(state): Extension<AppState>) -> Response {
    let report = state
        .registry
        .evaluate(CheckTags::READINESS.union(CheckTags::LIVENESS))
        .await;
    let counters = runtime_counters().snapshot();

    let dispatcher = state
        .dispatcher_state
        .as_ref()
        .map(|handle| handle.get().as_str());

    let body = Json(json!({
        "role": state.role.as_str(),
        "status": report.status.as_str(),
        "checks": check_entries_payload(&report),
        "dispatcher": dispatcher,
        "counters": {
            "publish_success": counters.publish_success,
            "publish_failure": counters.publish_failure,
            "deliveries_inflight": counters.deliveries_inflight,
            "acked": counters.acked,
            "requeued": counters.requeued,
            "dead_lettered": counters.dead_lettered,
            "handler_retries": counters.handler_retries,
            "health_evaluations": counters.health_evaluations,
        },
        "evaluated_at": report.evaluated_at.to_rfc3339(),
    }));

    let mut response = (StatusCode::OK, body).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    kind: String,
    #[serde(default)]
    payload: JsonValue,
}

async fn publish_event(
    Extension(state): Extension<AppState>,
    JsonBody(request): JsonBody<PublishRequest>,
) -> Response {
    let Some(publisher) = state.publisher.as_ref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "publishing is not enabled for this role"})),
        )
            .into_response();
    };

    let event = DomainEvent::new(request.kind, request.payload);

    match publisher.publish(&event).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "id": event.id,
                "destination": publisher.destination(),
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
