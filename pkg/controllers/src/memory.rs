//! An in-process [`RbacSource`] with controllable outages.
//!
//! Versions are handed out from a single counter, deletions included, and
//! every event is retained so a watch from any version can be replayed.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use pkg_types::event::{ListSnapshot, RbacEvent, RbacObject, WatchKind};
use pkg_types::rbac::ResourceVersion;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::source::{EventStream, RbacSource, SourceError};

type ObjectId = (WatchKind, Option<String>, String);
type Subscriber = mpsc::UnboundedSender<Result<RbacEvent, SourceError>>;

#[derive(Default)]
struct Inner {
    version: u64,
    objects: BTreeMap<ObjectId, RbacObject>,
    history: Vec<(WatchKind, RbacEvent)>,
    subscribers: Vec<(WatchKind, Subscriber)>,
    offline: BTreeSet<WatchKind>,
    denied: BTreeSet<(WatchKind, String)>,
}

impl Inner {
    fn next_version(&mut self) -> ResourceVersion {
        self.version += 1;
        ResourceVersion(self.version)
    }

    fn publish(&mut self, kind: WatchKind, event: RbacEvent) {
        self.history.push((kind, event.clone()));
        self.subscribers
            .retain(|(k, tx)| *k != kind || tx.send(Ok(event.clone())).is_ok());
    }
}

fn id(obj: &RbacObject) -> ObjectId {
    match obj {
        RbacObject::Role(r) => (obj.kind(), r.namespace.clone(), r.name.clone()),
        RbacObject::RoleBinding(rb) => (obj.kind(), Some(rb.namespace.clone()), rb.name.clone()),
        RbacObject::ClusterRoleBinding(crb) => (obj.kind(), None, crb.name.clone()),
    }
}

fn stamp(mut obj: RbacObject, rv: ResourceVersion) -> RbacObject {
    match &mut obj {
        RbacObject::Role(r) => r.resource_version = rv,
        RbacObject::RoleBinding(rb) => rb.resource_version = rv,
        RbacObject::ClusterRoleBinding(crb) => crb.resource_version = rv,
    }
    obj
}

#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object. Its resource version is overwritten.
    pub fn put(&self, obj: RbacObject) -> ResourceVersion {
        let mut inner = self.inner.lock();
        let rv = inner.next_version();
        let obj = stamp(obj, rv);
        let kind = obj.kind();
        inner.objects.insert(id(&obj), obj.clone());
        inner.publish(kind, obj.applied());
        rv
    }

    /// Delete the object with the same identity as `obj`, if present.
    pub fn delete(&self, obj: &RbacObject) -> Option<ResourceVersion> {
        let mut inner = self.inner.lock();
        let held = inner.objects.remove(&id(obj))?;
        let rv = inner.next_version();
        let kind = held.kind();
        inner.publish(kind, stamp(held, rv).deleted());
        Some(rv)
    }

    /// Ends open watches of `kind` and fails list/watch until brought back.
    pub fn set_offline(&self, kind: WatchKind, offline: bool) {
        let mut inner = self.inner.lock();
        if offline {
            inner.offline.insert(kind);
            inner.subscribers.retain(|(k, _)| *k != kind);
        } else {
            inner.offline.remove(&kind);
        }
    }

    /// Ends open watches of `kind` without an outage.
    pub fn disconnect(&self, kind: WatchKind) {
        self.inner.lock().subscribers.retain(|(k, _)| *k != kind);
    }

    pub fn deny(&self, kind: WatchKind, verb: &str) {
        self.inner.lock().denied.insert((kind, verb.to_string()));
    }

    /// Every event published so far, in order.
    pub fn history(&self) -> Vec<RbacEvent> {
        self.inner
            .lock()
            .history
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn version(&self) -> ResourceVersion {
        ResourceVersion(self.inner.lock().version)
    }
}

fn unavailable(kind: WatchKind) -> SourceError {
    SourceError::Transient(format!("{} offline", kind))
}

#[async_trait]
impl RbacSource for MemorySource {
    async fn list(&self, kind: WatchKind) -> Result<ListSnapshot, SourceError> {
        let inner = self.inner.lock();
        if inner.offline.contains(&kind) {
            return Err(unavailable(kind));
        }
        Ok(ListSnapshot {
            resource_version: ResourceVersion(inner.version),
            objects: inner
                .objects
                .iter()
                .filter(|((k, _, _), _)| *k == kind)
                .map(|(_, obj)| obj.clone())
                .collect(),
        })
    }

    async fn watch(
        &self,
        kind: WatchKind,
        from: ResourceVersion,
    ) -> Result<EventStream, SourceError> {
        let mut inner = self.inner.lock();
        if inner.offline.contains(&kind) {
            return Err(unavailable(kind));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for (k, event) in &inner.history {
            if *k == kind && event.resource_version() > from {
                let _ = tx.send(Ok(event.clone()));
            }
        }
        inner.subscribers.push((kind, tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn can_i(&self, kind: WatchKind, verb: &str) -> Result<bool, SourceError> {
        Ok(!self.inner.lock().denied.contains(&(kind, verb.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::rbac::{PolicyRule, Role};

    fn reader() -> RbacObject {
        RbacObject::Role(Role {
            name: "reader".to_string(),
            namespace: Some("ns1".to_string()),
            rules: vec![PolicyRule {
                verbs: vec!["get".to_string()],
                resources: vec!["projects".to_string()],
                ..Default::default()
            }],
            resource_version: ResourceVersion::default(),
        })
    }

    #[tokio::test]
    async fn test_watch_replays_events_after_cursor() {
        let source = MemorySource::new();
        let first = source.put(reader());
        let second = source.put(reader());
        source.delete(&reader());

        let mut stream = source.watch(WatchKind::Roles, first).await.unwrap();
        let replayed = stream.next().await.unwrap().unwrap();
        assert_eq!(replayed.resource_version(), second);
        let deleted = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            deleted,
            RbacEvent::Role(pkg_types::event::ObjectEvent::Deleted(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_ends_streams_and_fails_calls() {
        let source = MemorySource::new();
        source.put(reader());
        let mut stream = source
            .watch(WatchKind::Roles, source.version())
            .await
            .unwrap();
        source.set_offline(WatchKind::Roles, true);
        assert!(stream.next().await.is_none());
        assert!(source.list(WatchKind::Roles).await.is_err());
        // other kinds are unaffected
        assert!(source.list(WatchKind::RoleBindings).await.is_ok());

        source.set_offline(WatchKind::Roles, false);
        let listed = source.list(WatchKind::Roles).await.unwrap();
        assert_eq!(listed.objects.len(), 1);
    }
}
