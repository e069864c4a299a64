//! Short-TTL memoization of verdicts.
//!
//! Entries are tagged with the index generation they were computed against.
//! The cache remembers the newest generation any grant delta announced; an
//! insert computed before that generation is dropped rather than stored, so a
//! verdict from a superseded index is never served.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use pkg_metrics::ResolverMetrics;
use pkg_state::store::InvalidationSink;
use pkg_state::watch::GrantDelta;
use pkg_types::access::{AccessRequest, Verdict};
use pkg_types::rbac::{RoleKey, Subject};
use tracing::debug;

use crate::resolver::Decision;

struct Entry {
    verdict: Verdict,
    principals: Vec<Subject>,
    roles: BTreeSet<RoleKey>,
    inserted_at: Instant,
}

impl Entry {
    fn affected_by(&self, delta: &GrantDelta) -> bool {
        self.principals.iter().any(|p| delta.subjects.contains(p))
            || self.roles.iter().any(|r| delta.roles.contains(r))
    }
}

struct Inner {
    entries: LruCache<AccessRequest, Entry>,
    /// Newest generation announced by a delta.
    floor: u64,
}

pub struct DecisionCache {
    /// `None` when caching is disabled (zero capacity or TTL).
    inner: Option<Mutex<Inner>>,
    ttl: Duration,
    metrics: Arc<ResolverMetrics>,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl: Duration, metrics: Arc<ResolverMetrics>) -> Self {
        let inner = NonZeroUsize::new(capacity)
            .filter(|_| !ttl.is_zero())
            .map(|cap| {
                Mutex::new(Inner {
                    entries: LruCache::new(cap),
                    floor: 0,
                })
            });
        Self {
            inner,
            ttl,
            metrics,
        }
    }

    /// A fresh cached verdict for `req`, if any. `req` must be normalized.
    pub fn get(&self, req: &AccessRequest) -> Option<Verdict> {
        let inner = self.inner.as_ref()?;
        let mut inner = inner.lock();
        let expired = match inner.entries.get(req) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.metrics.cache_hits.inc();
                return Some(entry.verdict);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.pop(req);
            self.metrics.cache_evictions.inc();
        }
        self.metrics.cache_misses.inc();
        None
    }

    /// Store a decision unless the index has moved past the generation it
    /// was computed against. Returns whether it was stored.
    pub fn insert(&self, req: AccessRequest, decision: &Decision) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return false;
        };
        let mut inner = inner.lock();
        if decision.generation < inner.floor {
            self.metrics.cache_stale_inserts.inc();
            debug!(
                "Dropping decision computed at generation {} (current {})",
                decision.generation, inner.floor
            );
            return false;
        }

        let entry = Entry {
            verdict: decision.verdict,
            principals: req.principals(),
            roles: decision.roles.clone(),
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(req.clone(), entry) {
            if evicted != req {
                self.metrics.cache_evictions.inc();
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|i| i.lock().entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.lock().entries.clear();
        }
    }
}

impl InvalidationSink for DecisionCache {
    fn invalidate(&self, delta: &GrantDelta) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut inner = inner.lock();
        inner.floor = inner.floor.max(delta.generation);

        let doomed: Vec<AccessRequest> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.affected_by(delta))
            .map(|(req, _)| req.clone())
            .collect();
        for req in &doomed {
            inner.entries.pop(req);
        }
        if !doomed.is_empty() {
            self.metrics.cache_invalidations.add(doomed.len() as u64);
            debug!(
                "Invalidated {} cached decision(s) at generation {}",
                doomed.len(),
                delta.generation
            );
        }
    }
}
