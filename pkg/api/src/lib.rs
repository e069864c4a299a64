pub mod auth;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_authz::Authorize;
use pkg_controllers::health::HealthTracker;
use pkg_metrics::ResolverMetrics;
use pkg_state::watch::DeltaLog;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub authorizer: Arc<dyn Authorize>,
    pub health: HealthTracker,
    pub metrics: Arc<ResolverMetrics>,
    pub deltas: DeltaLog,
    /// Bearer token required on `/api/v1/*`; `None` leaves it open.
    pub api_token: Option<String>,
}
