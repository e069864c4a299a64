//! Tagged ingest events.
//!
//! Payloads from the RBAC source are decoded into these variants at the watch
//! boundary; nothing past ingest looks at untyped data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rbac::{ClusterRoleBinding, ResourceVersion, Role, RoleBinding};

/// Kinds watched on the RBAC source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Roles,
    ClusterRoles,
    RoleBindings,
    ClusterRoleBindings,
}

impl WatchKind {
    /// Plural resource name as used by the Kubernetes API.
    pub fn plural(&self) -> &'static str {
        match self {
            WatchKind::Roles => "roles",
            WatchKind::ClusterRoles => "clusterroles",
            WatchKind::RoleBindings => "rolebindings",
            WatchKind::ClusterRoleBindings => "clusterrolebindings",
        }
    }

    /// The kinds watched when cluster roles are not requested.
    pub fn defaults() -> [WatchKind; 3] {
        [
            WatchKind::Roles,
            WatchKind::RoleBindings,
            WatchKind::ClusterRoleBindings,
        ]
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Add/update or delete of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectEvent<T> {
    Applied(T),
    /// Carries the last known state of the object, stamped with the deletion version.
    Deleted(T),
}

impl<T> ObjectEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            ObjectEvent::Applied(o) | ObjectEvent::Deleted(o) => o,
        }
    }
}

pub type RoleEvent = ObjectEvent<Role>;
pub type RoleBindingEvent = ObjectEvent<RoleBinding>;
pub type ClusterRoleBindingEvent = ObjectEvent<ClusterRoleBinding>;

/// One decoded event from any watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RbacEvent {
    Role(RoleEvent),
    RoleBinding(RoleBindingEvent),
    ClusterRoleBinding(ClusterRoleBindingEvent),
    /// Cursor advance without an object change.
    Bookmark(ResourceVersion),
}

impl RbacEvent {
    /// Kind of the object carried; `None` for bookmarks.
    pub fn kind(&self) -> Option<WatchKind> {
        match self {
            RbacEvent::Role(e) if e.object().namespace.is_none() => Some(WatchKind::ClusterRoles),
            RbacEvent::Role(_) => Some(WatchKind::Roles),
            RbacEvent::RoleBinding(_) => Some(WatchKind::RoleBindings),
            RbacEvent::ClusterRoleBinding(_) => Some(WatchKind::ClusterRoleBindings),
            RbacEvent::Bookmark(_) => None,
        }
    }

    pub fn resource_version(&self) -> ResourceVersion {
        match self {
            RbacEvent::Role(e) => e.object().resource_version,
            RbacEvent::RoleBinding(e) => e.object().resource_version,
            RbacEvent::ClusterRoleBinding(e) => e.object().resource_version,
            RbacEvent::Bookmark(rv) => *rv,
        }
    }
}

/// A full object as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RbacObject {
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRoleBinding(ClusterRoleBinding),
}

impl RbacObject {
    pub fn kind(&self) -> WatchKind {
        match self {
            RbacObject::Role(r) if r.namespace.is_none() => WatchKind::ClusterRoles,
            RbacObject::Role(_) => WatchKind::Roles,
            RbacObject::RoleBinding(_) => WatchKind::RoleBindings,
            RbacObject::ClusterRoleBinding(_) => WatchKind::ClusterRoleBindings,
        }
    }

    pub fn resource_version(&self) -> ResourceVersion {
        match self {
            RbacObject::Role(r) => r.resource_version,
            RbacObject::RoleBinding(rb) => rb.resource_version,
            RbacObject::ClusterRoleBinding(crb) => crb.resource_version,
        }
    }

    pub fn applied(self) -> RbacEvent {
        match self {
            RbacObject::Role(r) => RbacEvent::Role(ObjectEvent::Applied(r)),
            RbacObject::RoleBinding(rb) => RbacEvent::RoleBinding(ObjectEvent::Applied(rb)),
            RbacObject::ClusterRoleBinding(crb) => {
                RbacEvent::ClusterRoleBinding(ObjectEvent::Applied(crb))
            }
        }
    }

    pub fn deleted(self) -> RbacEvent {
        match self {
            RbacObject::Role(r) => RbacEvent::Role(ObjectEvent::Deleted(r)),
            RbacObject::RoleBinding(rb) => RbacEvent::RoleBinding(ObjectEvent::Deleted(rb)),
            RbacObject::ClusterRoleBinding(crb) => {
                RbacEvent::ClusterRoleBinding(ObjectEvent::Deleted(crb))
            }
        }
    }
}

/// Complete state of one kind at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSnapshot {
    pub resource_version: ResourceVersion,
    pub objects: Vec<RbacObject>,
}
