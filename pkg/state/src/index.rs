//! Binding Cache and Role Index.
//!
//! Pure keyed indexes over locally held state: point lookups never touch the
//! network. Objects are ordered by their source resource version; anything at
//! or below the held version (live object or tombstone) is discarded.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pkg_types::event::{ObjectEvent, RbacEvent, RbacObject, WatchKind};
use pkg_types::rbac::{Binding, BindingKey, ResourceVersion, Role, RoleKey, Subject};
use tracing::debug;

use crate::watch::GrantDelta;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ObjectKey {
    Role(RoleKey),
    Binding(BindingKey),
}

impl ObjectKey {
    fn kind(&self) -> WatchKind {
        match self {
            ObjectKey::Role(k) if k.namespace.is_none() => WatchKind::ClusterRoles,
            ObjectKey::Role(_) => WatchKind::Roles,
            ObjectKey::Binding(k) if k.namespace.is_none() => WatchKind::ClusterRoleBindings,
            ObjectKey::Binding(_) => WatchKind::RoleBindings,
        }
    }
}

/// `None`: no effect. `Err((held, incoming))`: stale.
type Change = Option<Result<GrantDelta, (ResourceVersion, ResourceVersion)>>;

/// Result of offering one event to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(GrantDelta),
    /// Version at or below the locally held one; nothing changed.
    Stale {
        held: ResourceVersion,
        incoming: ResourceVersion,
    },
    /// Accepted but without effect on grants (bookmarks, deletes of unknown objects).
    Unchanged,
}

/// Comparable view of the indexed objects, without bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub roles: BTreeMap<RoleKey, Role>,
    pub bindings: BTreeMap<BindingKey, Binding>,
}

#[derive(Debug, Default)]
pub struct RbacIndex {
    roles: HashMap<RoleKey, Role>,
    bindings: HashMap<BindingKey, Binding>,
    by_subject: HashMap<Subject, BTreeSet<BindingKey>>,
    /// Version at which a deleted object disappeared.
    tombstones: HashMap<ObjectKey, ResourceVersion>,
    generation: u64,
}

impl RbacIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped once per mutation that changed grants.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn role(&self, key: &RoleKey) -> Option<&Role> {
        self.roles.get(key)
    }

    pub fn binding(&self, key: &BindingKey) -> Option<&Binding> {
        self.bindings.get(key)
    }

    /// All bindings naming `subject`, in key order.
    pub fn bindings_for<'a>(&'a self, subject: &Subject) -> impl Iterator<Item = &'a Binding> + 'a {
        self.by_subject
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(|key| self.bindings.get(key))
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Bindings whose role is not (yet) known.
    pub fn dangling_bindings(&self) -> usize {
        self.bindings
            .values()
            .filter(|b| !self.roles.contains_key(&b.role_key()))
            .count()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            roles: self.roles.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            bindings: self
                .bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Apply one watch event under last-writer-wins-by-version.
    pub fn apply(&mut self, event: RbacEvent) -> ApplyOutcome {
        let outcome = match event {
            RbacEvent::Role(ObjectEvent::Applied(role)) => self.upsert_role(role),
            RbacEvent::Role(ObjectEvent::Deleted(role)) => {
                self.delete(ObjectKey::Role(role.key()), role.resource_version)
            }
            RbacEvent::RoleBinding(ObjectEvent::Applied(rb)) => self.upsert_binding(rb.into()),
            RbacEvent::RoleBinding(ObjectEvent::Deleted(rb)) => {
                let binding = Binding::from(rb);
                self.delete(ObjectKey::Binding(binding.key()), binding.resource_version())
            }
            RbacEvent::ClusterRoleBinding(ObjectEvent::Applied(crb)) => {
                self.upsert_binding(crb.into())
            }
            RbacEvent::ClusterRoleBinding(ObjectEvent::Deleted(crb)) => {
                let binding = Binding::from(crb);
                self.delete(ObjectKey::Binding(binding.key()), binding.resource_version())
            }
            RbacEvent::Bookmark(_) => return ApplyOutcome::Unchanged,
        };

        match outcome {
            Some(Ok(mut delta)) => {
                self.generation += 1;
                delta.generation = self.generation;
                ApplyOutcome::Applied(delta)
            }
            Some(Err((held, incoming))) => ApplyOutcome::Stale { held, incoming },
            None => ApplyOutcome::Unchanged,
        }
    }

    /// Make `kind` match a full listing: drop what the listing lacks, replace
    /// what differs. Returns the delta if anything changed.
    pub fn replace_kind(
        &mut self,
        kind: WatchKind,
        objects: Vec<RbacObject>,
        list_version: ResourceVersion,
    ) -> Option<GrantDelta> {
        let mut delta = GrantDelta::default();
        let mut listed: BTreeSet<ObjectKey> = BTreeSet::new();

        for object in objects.into_iter().filter(|o| o.kind() == kind) {
            match object {
                RbacObject::Role(role) => {
                    let key = role.key();
                    listed.insert(ObjectKey::Role(key.clone()));
                    if self.roles.get(&key) != Some(&role) {
                        self.roles.insert(key.clone(), role);
                        delta.roles.insert(key);
                    }
                }
                RbacObject::RoleBinding(rb) => self.replace_binding(rb.into(), &mut listed, &mut delta),
                RbacObject::ClusterRoleBinding(crb) => {
                    self.replace_binding(crb.into(), &mut listed, &mut delta)
                }
            }
        }

        let gone: Vec<ObjectKey> = self
            .roles
            .keys()
            .cloned()
            .map(ObjectKey::Role)
            .chain(self.bindings.keys().cloned().map(ObjectKey::Binding))
            .filter(|k| k.kind() == kind && !listed.contains(k))
            .collect();
        for key in gone {
            self.remove(&key, &mut delta);
        }

        self.tombstones
            .retain(|k, v| k.kind() != kind || *v > list_version);

        if delta.is_empty() {
            return None;
        }
        self.generation += 1;
        delta.generation = self.generation;
        Some(delta)
    }

    fn held_version(&self, key: &ObjectKey) -> Option<ResourceVersion> {
        let live = match key {
            ObjectKey::Role(k) => self.roles.get(k).map(|r| r.resource_version),
            ObjectKey::Binding(k) => self.bindings.get(k).map(|b| b.resource_version()),
        };
        live.or_else(|| self.tombstones.get(key).copied())
    }

    fn check_version(
        &self,
        key: &ObjectKey,
        incoming: ResourceVersion,
    ) -> Result<(), (ResourceVersion, ResourceVersion)> {
        match self.held_version(key) {
            Some(held) if incoming <= held => Err((held, incoming)),
            _ => Ok(()),
        }
    }

    fn upsert_role(
        &mut self,
        role: Role,
    ) -> Change {
        let key = role.key();
        let object_key = ObjectKey::Role(key.clone());
        if let Err(stale) = self.check_version(&object_key, role.resource_version) {
            return Some(Err(stale));
        }
        self.tombstones.remove(&object_key);

        let resolved = self
            .bindings
            .values()
            .filter(|b| b.role_key() == key)
            .count();
        if resolved > 0 && !self.roles.contains_key(&key) {
            debug!("{} resolves {} previously dangling binding(s)", key, resolved);
        }

        self.roles.insert(key.clone(), role);
        let mut delta = GrantDelta::default();
        delta.roles.insert(key);
        Some(Ok(delta))
    }

    fn upsert_binding(
        &mut self,
        binding: Binding,
    ) -> Change {
        let key = binding.key();
        let object_key = ObjectKey::Binding(key.clone());
        if let Err(stale) = self.check_version(&object_key, binding.resource_version()) {
            return Some(Err(stale));
        }
        self.tombstones.remove(&object_key);

        let mut delta = GrantDelta::default();
        self.remove(&object_key, &mut delta);
        self.insert_binding(binding, &mut delta);
        Some(Ok(delta))
    }

    fn delete(
        &mut self,
        key: ObjectKey,
        version: ResourceVersion,
    ) -> Change {
        if let Err(stale) = self.check_version(&key, version) {
            return Some(Err(stale));
        }
        let mut delta = GrantDelta::default();
        self.remove(&key, &mut delta);
        self.tombstones.insert(key, version);
        if delta.is_empty() { None } else { Some(Ok(delta)) }
    }

    fn replace_binding(
        &mut self,
        binding: Binding,
        listed: &mut BTreeSet<ObjectKey>,
        delta: &mut GrantDelta,
    ) {
        let key = binding.key();
        listed.insert(ObjectKey::Binding(key.clone()));
        if self.bindings.get(&key) == Some(&binding) {
            return;
        }
        self.remove(&ObjectKey::Binding(key), delta);
        self.insert_binding(binding, delta);
    }

    fn insert_binding(&mut self, binding: Binding, delta: &mut GrantDelta) {
        let key = binding.key();
        let role_key = binding.role_key();
        if !self.roles.contains_key(&role_key) {
            debug!(
                "{} references unresolved {}; it grants nothing until the role arrives",
                key, role_key
            );
        }
        for subject in binding.subjects() {
            self.by_subject
                .entry(subject.clone())
                .or_default()
                .insert(key.clone());
            delta.subjects.insert(subject.clone());
        }
        self.bindings.insert(key, binding);
    }

    /// Drop an object and every index entry derived from it.
    fn remove(&mut self, key: &ObjectKey, delta: &mut GrantDelta) {
        match key {
            ObjectKey::Role(k) => {
                if self.roles.remove(k).is_some() {
                    delta.roles.insert(k.clone());
                }
            }
            ObjectKey::Binding(k) => {
                let Some(old) = self.bindings.remove(k) else {
                    return;
                };
                for subject in old.subjects() {
                    if let Some(keys) = self.by_subject.get_mut(subject) {
                        keys.remove(k);
                        if keys.is_empty() {
                            self.by_subject.remove(subject);
                        }
                    }
                    delta.subjects.insert(subject.clone());
                }
            }
        }
    }
}
