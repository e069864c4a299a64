use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{authorize, health, watch};
use crate::request_id::request_id_middleware;

pub fn build_router(state: AppState) -> Router {
    // Protected API routes
    let api_routes = Router::new()
        .route("/api/v1/authorize", post(authorize::authorize))
        .route(
            "/api/v1/authorize/actions",
            post(authorize::authorize_actions),
        )
        .route("/api/v1/permitted", post(authorize::permitted))
        .route("/api/v1/watch/grants", get(watch::watch_grants))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Probes stay open for kubelet and scrapers.
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn start_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    info!("Starting API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down API server");
        })
        .await?;

    Ok(())
}
