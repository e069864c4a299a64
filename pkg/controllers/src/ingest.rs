//! Watch Ingest: one controller per watched kind.
//!
//! Each controller lists its kind, then watches from the list's version. When
//! the stream ends or fails it re-lists, which reconciles anything missed
//! while disconnected, and resumes from the new version. Repeated re-list
//! failures move the kind to `Degraded`; the index keeps serving what it has.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pkg_constants::state::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_SECS,
    DEFAULT_DEGRADED_AFTER_FAILURES,
};
use pkg_metrics::ResolverMetrics;
use pkg_state::index::ApplyOutcome;
use pkg_state::store::RbacStore;
use pkg_types::event::{RbacEvent, WatchKind};
use pkg_types::rbac::ResourceVersion;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backoff::Backoff;
use crate::health::{HealthTracker, WatchPhase};
use crate::source::{RbacSource, SourceError};

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Bound on a single list or watch-establishment call.
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
    /// Consecutive failed re-lists before a kind counts as degraded.
    pub degraded_after: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            backoff: Backoff::new(
                Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS),
            ),
            degraded_after: DEFAULT_DEGRADED_AFTER_FAILURES,
        }
    }
}

/// Why a watch stopped delivering.
#[derive(Debug)]
enum Interruption {
    /// The source closed the stream.
    Closed { delivered: usize },
    Failed { error: SourceError, delivered: usize },
}

pub struct WatchController<S: RbacSource> {
    kind: WatchKind,
    source: Arc<S>,
    store: RbacStore,
    health: HealthTracker,
    metrics: Arc<ResolverMetrics>,
    settings: WatchSettings,
}

impl<S: RbacSource> WatchController<S> {
    pub fn new(
        kind: WatchKind,
        source: Arc<S>,
        store: RbacStore,
        health: HealthTracker,
        metrics: Arc<ResolverMetrics>,
        settings: WatchSettings,
    ) -> Self {
        Self {
            kind,
            source,
            store,
            health,
            metrics,
            settings,
        }
    }

    /// Start the controller loop as a background task. Runs until aborted.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let span = info_span!("watch", kind = %self.kind);
        tokio::spawn(
            async move {
                info!(
                    "WatchController started (timeout={}s, degraded after {} failures)",
                    self.settings.attempt_timeout.as_secs(),
                    self.settings.degraded_after
                );
                self.run().await
            }
            .instrument(span),
        )
    }

    async fn run(self) {
        let mut phase = WatchPhase::Connecting;
        // failed re-lists in a row
        let mut failures: u32 = 0;
        // watches in a row that broke before delivering anything
        let mut barren: u32 = 0;
        let mut cursor = ResourceVersion::default();

        loop {
            self.health.set_phase(self.kind, phase);
            phase = match phase {
                WatchPhase::Connecting | WatchPhase::Reconnecting | WatchPhase::Degraded => {
                    match self.relist().await {
                        Ok(rv) => {
                            if phase == WatchPhase::Degraded {
                                info!("Recovered after {} failed re-list(s)", failures);
                            }
                            failures = 0;
                            cursor = rv;
                            WatchPhase::Watching
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            self.metrics.relist_failures.inc();
                            self.health.record_failure(self.kind, failures);
                            let next = if failures >= self.settings.degraded_after {
                                WatchPhase::Degraded
                            } else {
                                phase
                            };
                            if next == WatchPhase::Degraded && phase != WatchPhase::Degraded {
                                warn!(
                                    "Re-list failed {} times, serving last-known-good index: {}",
                                    failures, e
                                );
                            } else {
                                warn!("Re-list failed (attempt {}): {}", failures, e);
                            }
                            tokio::time::sleep(self.settings.backoff.delay(failures)).await;
                            next
                        }
                    }
                }
                WatchPhase::Watching => {
                    let interruption = self.watch_from(&mut cursor).await;
                    let delivered = match &interruption {
                        Interruption::Closed { delivered } => {
                            debug!("Watch closed at version {}", cursor);
                            *delivered
                        }
                        Interruption::Failed { error, delivered } => {
                            warn!("Watch interrupted at version {}: {}", cursor, error);
                            *delivered
                        }
                    };
                    if delivered > 0 {
                        barren = 0;
                    } else if matches!(interruption, Interruption::Failed { .. }) {
                        barren = barren.saturating_add(1);
                        tokio::time::sleep(self.settings.backoff.delay(barren)).await;
                    }
                    WatchPhase::Reconnecting
                }
            };
        }
    }

    /// Full list of the kind, reconciled into the index.
    async fn relist(&self) -> Result<ResourceVersion, SourceError> {
        let snapshot = tokio::time::timeout(
            self.settings.attempt_timeout,
            self.source.list(self.kind),
        )
        .await
        .map_err(|_| SourceError::Timeout { kind: self.kind })??;

        let rv = snapshot.resource_version;
        let count = snapshot.objects.len();
        let delta = self.store.replace(self.kind, snapshot);
        self.metrics.relists.inc();
        self.refresh_gauges();
        self.health.mark_synced(self.kind, rv);
        match delta {
            Some(delta) => info!(
                "Listed {} {} at version {} ({} subject(s), {} role(s) changed)",
                count,
                self.kind,
                rv,
                delta.subjects.len(),
                delta.roles.len()
            ),
            None => info!("Listed {} {} at version {} (no changes)", count, self.kind, rv),
        }
        Ok(rv)
    }

    /// Apply events until the stream stops, advancing `cursor` as it goes.
    async fn watch_from(&self, cursor: &mut ResourceVersion) -> Interruption {
        let opened = tokio::time::timeout(
            self.settings.attempt_timeout,
            self.source.watch(self.kind, *cursor),
        )
        .await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => return Interruption::Failed { error, delivered: 0 },
            Err(_) => {
                return Interruption::Failed {
                    error: SourceError::Timeout { kind: self.kind },
                    delivered: 0,
                };
            }
        };

        let mut delivered = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    delivered += 1;
                    let rv = event.resource_version();
                    self.ingest(event);
                    if rv > *cursor {
                        *cursor = rv;
                    }
                }
                Err(SourceError::Decode { kind, reason }) => {
                    warn!("Skipping undecodable {} event: {}", kind, reason);
                }
                Err(error) => return Interruption::Failed { error, delivered },
            }
        }
        Interruption::Closed { delivered }
    }

    fn ingest(&self, event: RbacEvent) {
        match self.store.apply(event) {
            ApplyOutcome::Applied(delta) => {
                self.metrics.events_applied.inc();
                self.refresh_gauges();
                debug!(
                    generation = delta.generation,
                    subjects = delta.subjects.len(),
                    roles = delta.roles.len(),
                    "Applied event"
                );
            }
            ApplyOutcome::Stale { .. } => self.metrics.events_stale.inc(),
            ApplyOutcome::Unchanged => {}
        }
    }

    fn refresh_gauges(&self) {
        let index = self.store.read();
        self.metrics.roles.set(index.role_count() as i64);
        self.metrics.bindings.set(index.binding_count() as i64);
        self.metrics
            .dangling_bindings
            .set(index.dangling_bindings() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;
    use pkg_state::index::IndexSnapshot;
    use pkg_types::event::RbacObject;
    use pkg_types::rbac::{
        ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, RoleRefKind, Subject,
    };

    fn settings() -> WatchSettings {
        WatchSettings {
            attempt_timeout: Duration::from_secs(1),
            backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
            degraded_after: 3,
        }
    }

    fn role(ns: &str, name: &str, verbs: &[&str]) -> RbacObject {
        RbacObject::Role(Role {
            name: name.to_string(),
            namespace: Some(ns.to_string()),
            rules: vec![PolicyRule {
                resources: vec!["feature-views".to_string()],
                verbs: verbs.iter().map(|v| v.to_string()).collect(),
                ..Default::default()
            }],
            resource_version: ResourceVersion::default(),
        })
    }

    fn binding(ns: &str, name: &str, role: &str, subjects: Vec<Subject>) -> RbacObject {
        RbacObject::RoleBinding(RoleBinding {
            name: name.to_string(),
            namespace: ns.to_string(),
            role_ref: RoleRef {
                kind: RoleRefKind::Role,
                name: role.to_string(),
            },
            subjects,
            resource_version: ResourceVersion::default(),
        })
    }

    fn cluster_binding(name: &str, role: &str, subjects: Vec<Subject>) -> RbacObject {
        RbacObject::ClusterRoleBinding(ClusterRoleBinding {
            name: name.to_string(),
            role_ref: RoleRef {
                kind: RoleRefKind::ClusterRole,
                name: role.to_string(),
            },
            subjects,
            resource_version: ResourceVersion::default(),
        })
    }

    /// The index an uninterrupted consumer of every event would hold.
    fn replayed(source: &MemorySource) -> IndexSnapshot {
        let reference = RbacStore::default();
        for event in source.history() {
            reference.apply(event);
        }
        let snapshot = reference.read().snapshot();
        snapshot
    }

    fn spawn_all(
        source: &Arc<MemorySource>,
        store: &RbacStore,
        health: &HealthTracker,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        WatchKind::defaults()
            .into_iter()
            .map(|kind| {
                WatchController::new(
                    kind,
                    source.clone(),
                    store.clone(),
                    health.clone(),
                    Arc::new(ResolverMetrics::new()),
                    settings(),
                )
                .start()
            })
            .collect()
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_initial_list_then_live_events() {
        let source = Arc::new(MemorySource::new());
        source.put(role("ns1", "reader", &["get"]));
        let store = RbacStore::default();
        let health = HealthTracker::new(&WatchKind::defaults());
        let tasks = spawn_all(&source, &store, &health);

        eventually("initial sync", || health.state().synced()).await;
        assert_eq!(store.read().role_count(), 1);

        source.put(binding(
            "ns1",
            "read",
            "reader",
            vec![Subject::service_account("ns1", "svc1")],
        ));
        eventually("binding applied", || store.read().binding_count() == 1).await;
        assert_eq!(
            health.report().kinds.get(&WatchKind::RoleBindings),
            Some(&WatchPhase::Watching)
        );
        tasks.iter().for_each(|t| t.abort());
    }

    #[tokio::test]
    async fn test_reconnect_with_missed_events_matches_uninterrupted_stream() {
        let source = Arc::new(MemorySource::new());
        let svc1 = Subject::service_account("ns1", "svc1");
        source.put(role("ns1", "reader", &["get", "list"]));
        source.put(role("ns1", "writer", &["create"]));
        source.put(binding("ns1", "read", "reader", vec![svc1.clone()]));
        source.put(binding("ns1", "write", "writer", vec![svc1.clone()]));

        let store = RbacStore::default();
        let health = HealthTracker::new(&WatchKind::defaults());
        let tasks = spawn_all(&source, &store, &health);
        eventually("initial sync", || store.read().snapshot() == replayed(&source)).await;

        // Everything below happens while no stream is open.
        for kind in WatchKind::defaults() {
            source.set_offline(kind, true);
        }
        source.put(role("ns1", "reader", &["get"]));
        source.delete(&role("ns1", "writer", &[]));
        source.delete(&binding("ns1", "write", "writer", vec![]));
        source.put(binding(
            "ns1",
            "read",
            "reader",
            vec![svc1.clone(), Subject::group("devs")],
        ));
        source.put(cluster_binding("everyone", "viewer", vec![Subject::user("alice")]));
        for kind in WatchKind::defaults() {
            source.set_offline(kind, false);
        }

        eventually("re-list after outage", || {
            store.read().snapshot() == replayed(&source)
        })
        .await;
        let index = store.read();
        assert!(index.role(&pkg_types::rbac::RoleKey::namespaced("ns1", "writer")).is_none());
        assert_eq!(index.binding_count(), 2);
        drop(index);
        tasks.iter().for_each(|t| t.abort());
    }

    #[tokio::test]
    async fn test_closed_stream_relists_without_losing_events() {
        let source = Arc::new(MemorySource::new());
        let store = RbacStore::default();
        let health = HealthTracker::new(&WatchKind::defaults());
        let tasks = spawn_all(&source, &store, &health);
        eventually("initial sync", || health.state().synced()).await;

        for i in 0..20 {
            source.put(role("ns1", &format!("r{}", i), &["get"]));
            if i % 5 == 0 {
                source.disconnect(WatchKind::Roles);
            }
        }
        eventually("all roles", || store.read().snapshot() == replayed(&source)).await;
        assert_eq!(store.read().role_count(), 20);
        tasks.iter().for_each(|t| t.abort());
    }

    #[tokio::test]
    async fn test_repeated_relist_failures_degrade_then_recover() {
        let source = Arc::new(MemorySource::new());
        source.put(role("ns1", "reader", &["get"]));
        let store = RbacStore::default();
        let health = HealthTracker::new(&WatchKind::defaults());
        health.set_authorized(true);
        let metrics = Arc::new(ResolverMetrics::new());
        let task = WatchController::new(
            WatchKind::Roles,
            source.clone(),
            store.clone(),
            health.clone(),
            metrics.clone(),
            settings(),
        )
        .start();
        eventually("roles synced", || store.read().role_count() == 1).await;

        source.set_offline(WatchKind::Roles, true);
        eventually("degraded", || health.report().degraded).await;
        assert!(metrics.relist_failures.get() >= 3);
        // last-known-good index still served
        assert_eq!(store.read().role_count(), 1);

        source.put(role("ns1", "writer", &["create"]));
        source.set_offline(WatchKind::Roles, false);
        eventually("recovered", || {
            health.report().kinds.get(&WatchKind::Roles) == Some(&WatchPhase::Watching)
        })
        .await;
        assert_eq!(store.read().role_count(), 2);
        assert!(!health.report().degraded);
        task.abort();
    }

    #[tokio::test]
    async fn test_outage_of_one_kind_leaves_others_watching() {
        let source = Arc::new(MemorySource::new());
        let store = RbacStore::default();
        let health = HealthTracker::new(&WatchKind::defaults());
        let tasks = spawn_all(&source, &store, &health);
        eventually("initial sync", || health.state().synced()).await;

        source.set_offline(WatchKind::Roles, true);
        source.put(binding(
            "ns1",
            "read",
            "reader",
            vec![Subject::user("alice")],
        ));
        source.put(cluster_binding("admins", "admin", vec![Subject::group("ops")]));
        eventually("bindings applied", || store.read().binding_count() == 2).await;
        assert_ne!(
            health.report().kinds.get(&WatchKind::RoleBindings),
            Some(&WatchPhase::Degraded)
        );
        tasks.iter().for_each(|t| t.abort());
    }

    #[tokio::test]
    async fn test_stale_events_are_counted_not_applied() {
        let source = Arc::new(MemorySource::new());
        let store = RbacStore::default();
        let metrics = Arc::new(ResolverMetrics::new());
        let controller = WatchController::new(
            WatchKind::Roles,
            source.clone(),
            store.clone(),
            HealthTracker::new(&[WatchKind::Roles]),
            metrics.clone(),
            settings(),
        );
        source.put(role("ns1", "reader", &["get"]));
        source.put(role("ns1", "reader", &["get", "list"]));
        let history = source.history();

        controller.ingest(history[1].clone());
        controller.ingest(history[0].clone());
        assert_eq!(metrics.events_applied.get(), 1);
        assert_eq!(metrics.events_stale.get(), 1);
        assert_eq!(metrics.roles.get(), 1);
    }
}
