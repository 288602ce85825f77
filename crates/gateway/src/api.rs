//! Operator HTTP API.
//!
//! Commands are not applied by the handler: they are published as
//! `control-command` events and picked up by the control plane like any
//! other bus traffic, so the response only says the command was queued.

use std::str::FromStr;

use {
    axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    chatrelay_bus::EventBus,
    chatrelay_common::{ControlAction, Event, Platform},
    serde::Serialize,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use chatrelay_metrics::MetricsHandle;

use crate::{
    control::ControlPlane,
    relay::Relay,
    status::{StatusEntry, StatusTracker},
};

#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub control: ControlPlane,
    pub status: StatusTracker,
    #[cfg(feature = "metrics")]
    pub metrics: Option<MetricsHandle>,
}

impl AppState {
    pub fn from_relay(relay: &Relay) -> Self {
        Self {
            bus: relay.bus().clone(),
            control: relay.control().clone(),
            status: relay.status().clone(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, handle: MetricsHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// One row of `GET /api/platforms`.
#[derive(Debug, Serialize)]
struct PlatformView {
    #[serde(flatten)]
    status: StatusEntry,
    running: bool,
}

/// Build the API router (shared between production startup and tests).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/platforms", get(platforms_handler))
        .route("/api/platforms/{platform}/{command}", post(command_handler))
        .route("/api/bus/stats", get(bus_stats_handler));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(prometheus_metrics_handler));

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message: String = message.into();
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn platforms_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut views = Vec::with_capacity(Platform::ALL.len());
    for entry in state.status.snapshot() {
        let running = state.control.is_running(entry.platform).await;
        views.push(PlatformView {
            status: entry,
            running,
        });
    }
    Json(serde_json::json!({ "platforms": views }))
}

async fn command_handler(
    State(state): State<AppState>,
    Path((platform, command)): Path<(String, String)>,
) -> Response {
    let Ok(platform) = Platform::from_str(&platform) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("unknown platform: {platform}"),
        );
    };
    let Ok(command) = ControlAction::from_str(&command) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown command: {command}"),
        );
    };

    if !state.bus.publish(Event::control(platform, command)) {
        warn!(%platform, %command, "control command not queued");
        let reason = if state.bus.is_closed() {
            "relay is shutting down"
        } else {
            "event queue is full"
        };
        return error_response(StatusCode::SERVICE_UNAVAILABLE, reason);
    }
    info!(%platform, %command, "control command queued from api");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "accepted": true,
            "platform": platform,
            "command": command,
        })),
    )
        .into_response()
}

async fn bus_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bus.stats())
}

#[cfg(feature = "prometheus")]
async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not enabled").into_response(),
    }
}
