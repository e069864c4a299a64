use std::sync::Arc;

use pkg_constants::rbac::REQUIRED_SOURCE_VERBS;
use pkg_metrics::ResolverMetrics;
use pkg_state::store::RbacStore;
use pkg_types::event::WatchKind;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::health::HealthTracker;
use crate::ingest::{WatchController, WatchSettings};
use crate::source::{RbacSource, SourceError, StartupError};

/// Checks the service's own permissions, then runs one [`WatchController`]
/// per kind. Kinds never share reconnect state.
pub struct Supervisor<S: RbacSource> {
    source: Arc<S>,
    store: RbacStore,
    health: HealthTracker,
    metrics: Arc<ResolverMetrics>,
    settings: WatchSettings,
    kinds: Vec<WatchKind>,
}

impl<S: RbacSource> Supervisor<S> {
    pub fn new(
        source: Arc<S>,
        store: RbacStore,
        health: HealthTracker,
        metrics: Arc<ResolverMetrics>,
        settings: WatchSettings,
        kinds: Vec<WatchKind>,
    ) -> Self {
        Self {
            source,
            store,
            health,
            metrics,
            settings,
            kinds,
        }
    }

    /// Verify get/list/watch on every kind. A denial is final; errors reaching
    /// the source are retried with backoff.
    pub async fn preflight(&self) -> Result<(), StartupError> {
        for kind in &self.kinds {
            for verb in REQUIRED_SOURCE_VERBS {
                if !self.check(*kind, verb).await {
                    self.health.set_authorized(false);
                    error!("Service identity may not {} {}; refusing to serve", verb, kind);
                    return Err(StartupError::PermissionDenied {
                        kind: *kind,
                        verb: verb.to_string(),
                    });
                }
            }
        }
        self.health.set_authorized(true);
        info!("Permission check passed for {} kind(s)", self.kinds.len());
        Ok(())
    }

    async fn check(&self, kind: WatchKind, verb: &str) -> bool {
        let mut attempts: u32 = 0;
        loop {
            let outcome =
                tokio::time::timeout(self.settings.attempt_timeout, self.source.can_i(kind, verb))
                    .await
                    .unwrap_or(Err(SourceError::Timeout { kind }));
            match outcome {
                Ok(allowed) => return allowed,
                Err(SourceError::Forbidden(reason)) => {
                    warn!("Access review for {} {} forbidden: {}", verb, kind, reason);
                    return false;
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!("Access review for {} {} failed (attempt {}): {}", verb, kind, attempts, e);
                    tokio::time::sleep(self.settings.backoff.delay(attempts)).await;
                }
            }
        }
    }

    /// Preflight, then spawn the controllers.
    pub async fn start(self) -> Result<Vec<JoinHandle<()>>, StartupError> {
        self.preflight().await?;
        if !self.kinds.contains(&WatchKind::ClusterRoles) {
            warn!(
                "ClusterRoles are not watched: ClusterRoleBindings and RoleBindings \
                 to ClusterRoles grant nothing (enable watch-cluster-roles)"
            );
        }
        tokio::spawn(report_dangling_after_sync(
            self.health.clone(),
            self.metrics.clone(),
        ));
        let handles = self
            .kinds
            .iter()
            .map(|kind| {
                WatchController::new(
                    *kind,
                    self.source.clone(),
                    self.store.clone(),
                    self.health.clone(),
                    self.metrics.clone(),
                    self.settings,
                )
                .start()
            })
            .collect();
        Ok(handles)
    }
}

/// Wait for the first full sync, then warn about bindings whose role is
/// unknown. Returns their count.
pub async fn report_dangling_after_sync(
    health: HealthTracker,
    metrics: Arc<ResolverMetrics>,
) -> i64 {
    let mut rx = health.subscribe();
    if rx.wait_for(|state| state.synced()).await.is_err() {
        return 0;
    }
    let dangling = metrics.dangling_bindings.get();
    if dangling > 0 {
        warn!(
            "{} binding(s) reference a role that is not in the index and grant nothing",
            dangling
        );
    }
    dangling
}
