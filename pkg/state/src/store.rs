use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use pkg_constants::state::{DELTA_BROADCAST_CAPACITY, DELTA_LOG_CAPACITY};
use pkg_types::event::{ListSnapshot, RbacEvent, WatchKind};
use tracing::debug;

use crate::index::{ApplyOutcome, RbacIndex};
use crate::watch::{DeltaLog, GrantDelta};

/// Receives every grant delta while the index write lock is still held, so no
/// reader can observe the new index alongside an un-invalidated decision.
pub trait InvalidationSink: Send + Sync {
    fn invalidate(&self, delta: &GrantDelta);
}

/// Process-scoped handle to the Binding Cache / Role Index.
///
/// All mutation goes through [`RbacStore::apply`] and [`RbacStore::replace`],
/// which take the single writer-preferring lock; readers share it freely.
#[derive(Clone)]
pub struct RbacStore {
    index: Arc<RwLock<RbacIndex>>,
    sinks: Arc<[Arc<dyn InvalidationSink>]>,
    deltas: DeltaLog,
}

impl RbacStore {
    pub fn new(sinks: Vec<Arc<dyn InvalidationSink>>) -> Self {
        Self {
            index: Arc::new(RwLock::new(RbacIndex::new())),
            sinks: sinks.into(),
            deltas: DeltaLog::new(DELTA_LOG_CAPACITY, DELTA_BROADCAST_CAPACITY),
        }
    }

    /// Consistent read view. Blocks only behind an in-flight write.
    pub fn read(&self) -> RwLockReadGuard<'_, RbacIndex> {
        self.index.read()
    }

    pub fn generation(&self) -> u64 {
        self.index.read().generation()
    }

    pub fn deltas(&self) -> &DeltaLog {
        &self.deltas
    }

    /// Apply one decoded watch event.
    pub fn apply(&self, event: RbacEvent) -> ApplyOutcome {
        let mut index = self.index.write();
        let outcome = index.apply(event);
        match &outcome {
            ApplyOutcome::Applied(delta) => self.commit(delta),
            ApplyOutcome::Stale { held, incoming } => {
                debug!("Discarding stale event (held={}, incoming={})", held, incoming);
            }
            ApplyOutcome::Unchanged => {}
        }
        outcome
    }

    /// Reconcile one kind against a full listing.
    pub fn replace(&self, kind: WatchKind, snapshot: ListSnapshot) -> Option<GrantDelta> {
        let mut index = self.index.write();
        let delta = index.replace_kind(kind, snapshot.objects, snapshot.resource_version);
        if let Some(delta) = &delta {
            self.commit(delta);
        }
        delta
    }

    /// Runs under the write lock: the delta log stays in generation order.
    fn commit(&self, delta: &GrantDelta) {
        self.notify(delta);
        self.deltas.publish(delta.clone());
    }

    fn notify(&self, delta: &GrantDelta) {
        for sink in self.sinks.iter() {
            sink.invalidate(delta);
        }
    }
}

impl Default for RbacStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
