use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::AppState;

/// GET /healthz: Watch Ingest state; always 200.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.report()))
}

/// GET /readyz: 200 once every kind has synced and permissions are in place.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.state().ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
