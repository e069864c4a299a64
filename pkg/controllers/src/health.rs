//! Watch Ingest state as seen from outside.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use pkg_types::event::WatchKind;
use pkg_types::rbac::ResourceVersion;
use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of one watched kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchPhase {
    /// Initial list not yet completed.
    Connecting,
    Watching,
    /// Stream lost; re-listing.
    Reconnecting,
    /// Re-list keeps failing; serving the last-known-good index.
    Degraded,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchPhase::Connecting => write!(f, "Connecting"),
            WatchPhase::Watching => write!(f, "Watching"),
            WatchPhase::Reconnecting => write!(f, "Reconnecting"),
            WatchPhase::Degraded => write!(f, "Degraded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindState {
    pub phase: WatchPhase,
    /// At least one list has landed in the index.
    pub synced: bool,
    pub last_resource_version: Option<ResourceVersion>,
    pub consecutive_failures: u32,
}

impl Default for KindState {
    fn default() -> Self {
        Self {
            phase: WatchPhase::Connecting,
            synced: false,
            last_resource_version: None,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthState {
    /// The startup permission check passed.
    pub authorized: bool,
    pub kinds: BTreeMap<WatchKind, KindState>,
}

impl HealthState {
    pub fn synced(&self) -> bool {
        self.kinds.values().all(|k| k.synced)
    }

    pub fn degraded(&self) -> bool {
        !self.authorized || self.kinds.values().any(|k| k.phase == WatchPhase::Degraded)
    }

    pub fn ready(&self) -> bool {
        self.authorized && self.synced()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            synced: self.synced(),
            degraded: self.degraded(),
            authorized: self.authorized,
            kinds: self.kinds.iter().map(|(k, s)| (*k, s.phase)).collect(),
        }
    }
}

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub synced: bool,
    pub degraded: bool,
    pub authorized: bool,
    pub kinds: BTreeMap<WatchKind, WatchPhase>,
}

/// Shared, observable health of the watch controllers.
#[derive(Clone)]
pub struct HealthTracker {
    tx: Arc<watch::Sender<HealthState>>,
}

impl HealthTracker {
    /// Unauthorized and unsynced until told otherwise.
    pub fn new(kinds: &[WatchKind]) -> Self {
        let state = HealthState {
            authorized: false,
            kinds: kinds.iter().map(|k| (*k, KindState::default())).collect(),
        };
        let (tx, _) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    /// Nothing to watch, nothing to check.
    pub fn allow_all() -> Self {
        let tracker = Self::new(&[]);
        tracker.set_authorized(true);
        tracker
    }

    pub fn state(&self) -> HealthState {
        self.tx.borrow().clone()
    }

    pub fn report(&self) -> HealthReport {
        self.tx.borrow().report()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.tx.subscribe()
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.authorized != authorized;
            s.authorized = authorized;
            changed
        });
    }

    pub fn set_phase(&self, kind: WatchKind, phase: WatchPhase) {
        self.tx.send_if_modified(|s| {
            let entry = s.kinds.entry(kind).or_default();
            let changed = entry.phase != phase;
            entry.phase = phase;
            changed
        });
    }

    pub fn mark_synced(&self, kind: WatchKind, rv: ResourceVersion) {
        self.tx.send_modify(|s| {
            let entry = s.kinds.entry(kind).or_default();
            entry.synced = true;
            entry.last_resource_version = Some(rv);
            entry.consecutive_failures = 0;
        });
    }

    pub fn record_failure(&self, kind: WatchKind, failures: u32) {
        self.tx.send_modify(|s| {
            s.kinds.entry(kind).or_default().consecutive_failures = failures;
        });
    }
}
