use crate::metrics::Metrics;
use crate::shutdown::ShutdownOutcome;
use crate::state::{Status, WatchdogState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub status: Arc<RwLock<Status>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at: String,
    pub state: WatchdogState,
    pub threshold_celsius: f64,
    pub last_tick_at: Option<String>,
    pub last_temperature_celsius: Option<f64>,
    pub last_sensor_error: Option<String>,
    pub last_response_at: Option<String>,
    pub last_outcomes: Vec<ShutdownOutcome>,
    pub responses_total: u64,
    pub simulated: bool,
}

impl From<&Status> for ApiState {
    fn from(value: &Status) -> Self {
        Self {
            started_at: format_unix(value.started_at_unix),
            state: value.state,
            threshold_celsius: value.threshold_celsius,
            last_tick_at: value.last_tick_unix.map(format_unix),
            last_temperature_celsius: value.last_temperature_celsius,
            last_sensor_error: value.last_sensor_error.clone(),
            last_response_at: value.last_response_unix.map(format_unix),
            last_outcomes: value.last_outcomes.clone(),
            responses_total: value.responses_total,
            simulated: value.simulated,
        }
    }
}

pub fn build_router(metrics: Arc<Metrics>, status: Arc<RwLock<Status>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .with_state(HttpAppState { metrics, status })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
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

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.status.read().await;
    Json(ApiState::from(&*guard))
}

fn format_unix(secs: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}
