use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use pkg_types::rbac::{RoleKey, Subject};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Grants that may have changed with one index mutation.
///
/// Decisions whose principals intersect `subjects`, or that consulted a role
/// in `roles`, are no longer trustworthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDelta {
    /// Index generation produced by the mutation.
    pub generation: u64,
    pub subjects: BTreeSet<Subject>,
    pub roles: BTreeSet<RoleKey>,
}

impl GrantDelta {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.roles.is_empty()
    }
}

/// In-memory log of recent grant deltas, ordered by generation.
/// Subscribers receive live deltas; late joiners can replay the buffer.
#[derive(Clone)]
pub struct DeltaLog {
    inner: Arc<Mutex<VecDeque<GrantDelta>>>,
    max_deltas: usize,
    sender: broadcast::Sender<GrantDelta>,
}

impl DeltaLog {
    /// Create a delta log keeping up to `max_deltas` for replay.
    pub fn new(max_deltas: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(max_deltas))),
            max_deltas,
            sender,
        }
    }

    /// Record a delta and fan it out to subscribers.
    pub fn publish(&self, delta: GrantDelta) {
        {
            let mut deltas = self.inner.lock();
            // Ring buffer: drop oldest if at capacity
            if deltas.len() >= self.max_deltas {
                deltas.pop_front();
            }
            deltas.push_back(delta.clone());
        }
        // No receivers is fine
        let _ = self.sender.send(delta);
    }

    /// Generation of the newest buffered delta, 0 if none.
    pub fn latest_generation(&self) -> u64 {
        self.inner.lock().back().map(|d| d.generation).unwrap_or(0)
    }

    /// All buffered deltas newer than `generation`.
    pub fn since(&self, generation: u64) -> Vec<GrantDelta> {
        self.inner
            .lock()
            .iter()
            .filter(|d| d.generation > generation)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GrantDelta> {
        self.sender.subscribe()
    }
}
