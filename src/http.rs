use crate::engine::Severity;
use crate::heartbeat::HeartbeatRecord;
use crate::metrics::Metrics;
use crate::state::{now_unix, RuntimeState};
use crate::thresholds::{ThresholdConfig, ThresholdError, ThresholdRule, ThresholdStore};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<RuntimeState>>,
    pub store: Arc<ThresholdStore>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    timestamp: i64,
    verdict: Severity,
    triggered: Vec<String>,
    stale: bool,
    consecutive_fetch_failures: u32,
    uptime: String,
    readings: BTreeMap<String, f64>,
    last_heartbeat: Option<HeartbeatRecord>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: &'static str,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    thresholds: BTreeMap<String, ThresholdRule>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<RuntimeState>>,
    store: Arc<ThresholdStore>,
) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/config", get(get_config_handler).put(put_config_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            store,
        })
}

/// Process liveness only; says nothing about the monitored system.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status_handler(State(app): State<HttpAppState>) -> Response {
    let guard = app.state.read().await;
    if !guard.has_data() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError {
                error: "Unavailable",
                detail: "no metrics collected yet".to_string(),
            }),
        )
            .into_response();
    }

    let verdict = guard
        .last_verdict
        .clone()
        .unwrap_or_else(crate::engine::HealthVerdict::ok);
    let uptime_secs = now_unix().saturating_sub(guard.started_at_unix).max(0) as u64;
    let response = StatusResponse {
        timestamp: guard.last_cycle_unix,
        verdict: verdict.severity,
        triggered: verdict.triggered,
        stale: guard.is_stale(),
        consecutive_fetch_failures: guard.consecutive_fetch_failures,
        uptime: humantime::format_duration(Duration::from_secs(uptime_secs)).to_string(),
        readings: guard
            .last_snapshot
            .as_ref()
            .map(|s| s.readings.clone())
            .unwrap_or_default(),
        last_heartbeat: guard.last_heartbeat.clone(),
    };
    Json(response).into_response()
}

async fn get_config_handler(State(app): State<HttpAppState>) -> Json<ThresholdConfig> {
    Json(app.store.get().await)
}

async fn put_config_handler(
    State(app): State<HttpAppState>,
    Json(body): Json<ConfigDocument>,
) -> Response {
    match app.store.update(body.thresholds).await {
        Ok(config) => Json(config).into_response(),
        Err(err @ ThresholdError::InvalidRule { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "InvalidRule",
                detail: err.to_string(),
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "InternalFault",
                detail: err.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn metrics_handler(State(app): State<HttpAppState>) -> Response {
    app.metrics.inc_scrape_count();
    match app.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}
