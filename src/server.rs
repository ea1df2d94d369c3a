use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prometheus::TextEncoder;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::{
    events::{EventHandler, GatewayEvent},
    metrics::Metrics,
    utils::TimeSource,
};

#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventHandler>,
    pub metrics: Arc<Metrics>,
}

/// Health, metrics and event ingress routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/events", post(events_handler))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.events.processor().config().health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": TimeSource::new().utc_now().to_rfc3339()
        }))),
        Err(e) => {
            warn!("Health check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Interactions are answered inline; everything else runs on its own task
/// and is acknowledged with 202
async fn events_handler(
    State(state): State<AppState>,
    Json(event): Json<GatewayEvent>,
) -> Response {
    let event = match event {
        GatewayEvent::Interaction(interaction) => {
            let reply = state.events.on_interaction(interaction).await;
            return Json(reply).into_response();
        }
        other => other,
    };

    let events = state.events.clone();
    tokio::spawn(async move {
        if let Err(e) = events.handle(event).await {
            warn!("Event handling failed: {}", e);
        }
    });
    StatusCode::ACCEPTED.into_response()
}
