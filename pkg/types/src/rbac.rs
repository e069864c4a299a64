use std::fmt;
use std::str::FromStr;

use pkg_constants::rbac::{SERVICE_ACCOUNT_USER_PREFIX, SERVICE_ACCOUNTS_GROUP};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Resource version ---

/// Monotonically increasing version token assigned by the RBAC source.
///
/// Kubernetes treats `resourceVersion` as opaque, but etcd-backed servers hand
/// out decimal revisions, which is what ordering relies on here.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResourceVersion(pub u64);

#[derive(Debug, Error)]
#[error("resource version '{0}' is not a decimal revision")]
pub struct InvalidResourceVersion(pub String);

impl FromStr for ResourceVersion {
    type Err = InvalidResourceVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ResourceVersion)
            .map_err(|_| InvalidResourceVersion(s.to_string()))
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Policy rules ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// API groups this rule applies to (e.g., "" for core, "*" for all)
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Resource kinds (e.g., "feature-views", "entities", "*" for all)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Allowed verbs (e.g., "get", "list", "create", "update", "delete", "*" for all)
    pub verbs: Vec<String>,
    /// Restricts the rule to the named objects. Empty means any object.
    #[serde(default)]
    pub resource_names: Vec<String>,
}

// --- Role ---

/// Lookup key of a role. `namespace == None` is a cluster-scoped role (ClusterRole).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleKey {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl RoleKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "role {}/{}", ns, self.name),
            None => write!(f, "clusterrole {}", self.name),
        }
    }
}

/// A named, ordered set of rules. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    /// `None` for cluster-scoped roles.
    #[serde(default)]
    pub namespace: Option<String>,
    pub rules: Vec<PolicyRule>,
    pub resource_version: ResourceVersion,
}

impl Role {
    pub fn key(&self) -> RoleKey {
        RoleKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

// --- Subject ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    ServiceAccount,
    User,
    Group,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::ServiceAccount => write!(f, "ServiceAccount"),
            SubjectKind::User => write!(f, "User"),
            SubjectKind::Group => write!(f, "Group"),
        }
    }
}

/// A principal. `namespace` is empty for users and groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl Subject {
    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Group,
            name: name.into(),
            namespace: String::new(),
        }
    }

    /// Groups a subject belongs to without the caller saying so.
    pub fn implicit_groups(&self) -> Vec<Subject> {
        match self.kind {
            SubjectKind::ServiceAccount => vec![
                Subject::group(SERVICE_ACCOUNTS_GROUP),
                Subject::group(format!("{}:{}", SERVICE_ACCOUNTS_GROUP, self.namespace)),
            ],
            SubjectKind::User | SubjectKind::Group => Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectParseError {
    #[error("subject must not be empty")]
    Empty,
    #[error("service account '{0}' must be of the form <namespace>:<name>")]
    MalformedServiceAccount(String),
}

impl FromStr for Subject {
    type Err = SubjectParseError;

    /// Accepts `system:serviceaccount:<ns>:<name>`, `sa:<ns>:<name>`,
    /// `user:<name>`, `group:<name>`; anything else is a user name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SubjectParseError::Empty);
        }

        let sa = s
            .strip_prefix(SERVICE_ACCOUNT_USER_PREFIX)
            .or_else(|| s.strip_prefix("sa:"));
        if let Some(rest) = sa {
            return match rest.split_once(':') {
                Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                    Ok(Subject::service_account(ns, name))
                }
                _ => Err(SubjectParseError::MalformedServiceAccount(rest.to_string())),
            };
        }
        if let Some(name) = s.strip_prefix("group:") {
            return Ok(Subject::group(name));
        }
        if let Some(name) = s.strip_prefix("user:") {
            return Ok(Subject::user(name));
        }
        Ok(Subject::user(s))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubjectKind::ServiceAccount => write!(f, "sa:{}:{}", self.namespace, self.name),
            SubjectKind::User => write!(f, "user:{}", self.name),
            SubjectKind::Group => write!(f, "group:{}", self.name),
        }
    }
}

// --- Role reference ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleRefKind {
    Role,
    ClusterRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub kind: RoleRefKind,
    pub name: String,
}

// --- RoleBinding ---

/// Namespace-scoped binding. May reference a Role in its own namespace or a
/// ClusterRole; either way the grant is confined to `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub name: String,
    pub namespace: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
    pub resource_version: ResourceVersion,
}

// --- ClusterRoleBinding ---

/// Cluster-wide binding. Always resolves against cluster-scoped roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
    pub resource_version: ResourceVersion,
}

// --- Binding (index view over both binding kinds) ---

/// Lookup key of a binding. `namespace == None` is a ClusterRoleBinding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "rolebinding {}/{}", ns, self.name),
            None => write!(f, "clusterrolebinding {}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    Namespaced(RoleBinding),
    Cluster(ClusterRoleBinding),
}

impl Binding {
    pub fn key(&self) -> BindingKey {
        match self {
            Binding::Namespaced(rb) => BindingKey {
                namespace: Some(rb.namespace.clone()),
                name: rb.name.clone(),
            },
            Binding::Cluster(crb) => BindingKey {
                namespace: None,
                name: crb.name.clone(),
            },
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            Binding::Namespaced(rb) => &rb.subjects,
            Binding::Cluster(crb) => &crb.subjects,
        }
    }

    /// The role this binding grants. A ClusterRoleBinding only ever resolves
    /// cluster-scoped roles, whatever kind its reference names.
    pub fn role_key(&self) -> RoleKey {
        match self {
            Binding::Namespaced(rb) => match rb.role_ref.kind {
                RoleRefKind::Role => RoleKey::namespaced(&rb.namespace, &rb.role_ref.name),
                RoleRefKind::ClusterRole => RoleKey::cluster(&rb.role_ref.name),
            },
            Binding::Cluster(crb) => RoleKey::cluster(&crb.role_ref.name),
        }
    }

    /// Namespace the grant is confined to; `None` grants cluster-wide.
    pub fn scope(&self) -> Option<&str> {
        match self {
            Binding::Namespaced(rb) => Some(&rb.namespace),
            Binding::Cluster(_) => None,
        }
    }

    pub fn resource_version(&self) -> ResourceVersion {
        match self {
            Binding::Namespaced(rb) => rb.resource_version,
            Binding::Cluster(crb) => crb.resource_version,
        }
    }
}

impl From<RoleBinding> for Binding {
    fn from(rb: RoleBinding) -> Self {
        Binding::Namespaced(rb)
    }
}

impl From<ClusterRoleBinding> for Binding {
    fn from(crb: ClusterRoleBinding) -> Self {
        Binding::Cluster(crb)
    }
}
