//! Kubernetes API objects to index types.
//!
//! Anything the index cannot order or key (no name, no namespace on a
//! namespaced object, a non-decimal resource version, an unknown role ref
//! kind) is rejected here with [`SourceError::Decode`].

use k8s_openapi::api::rbac::v1 as rbacv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pkg_types::event::{RbacObject, WatchKind};
use pkg_types::rbac::{
    ClusterRoleBinding, PolicyRule, ResourceVersion, Role, RoleBinding, RoleRef, RoleRefKind,
    Subject,
};
use tracing::warn;

use crate::source::SourceError;

fn invalid(kind: WatchKind, reason: impl Into<String>) -> SourceError {
    SourceError::Decode {
        kind,
        reason: reason.into(),
    }
}

pub fn parse_version(kind: WatchKind, raw: Option<&str>) -> Result<ResourceVersion, SourceError> {
    let raw = raw.ok_or_else(|| invalid(kind, "missing resourceVersion"))?;
    raw.parse().map_err(|e| invalid(kind, format!("{}", e)))
}

/// Name, namespace and version out of object metadata.
fn identity(
    kind: WatchKind,
    meta: ObjectMeta,
) -> Result<(String, Option<String>, ResourceVersion), SourceError> {
    let rv = parse_version(kind, meta.resource_version.as_deref())?;
    let name = meta
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid(kind, "missing metadata.name"))?;
    Ok((name, meta.namespace.filter(|ns| !ns.is_empty()), rv))
}

fn rule(rule: rbacv1::PolicyRule) -> PolicyRule {
    PolicyRule {
        api_groups: rule.api_groups.unwrap_or_default(),
        resources: rule.resources.unwrap_or_default(),
        verbs: rule.verbs,
        resource_names: rule.resource_names.unwrap_or_default(),
    }
}

fn role_ref(kind: WatchKind, r: rbacv1::RoleRef) -> Result<RoleRef, SourceError> {
    let ref_kind = match r.kind.as_str() {
        "Role" => RoleRefKind::Role,
        "ClusterRole" => RoleRefKind::ClusterRole,
        other => return Err(invalid(kind, format!("unknown roleRef kind '{}'", other))),
    };
    Ok(RoleRef {
        kind: ref_kind,
        name: r.name,
    })
}

/// Unknown subject kinds are skipped. A service account without a namespace
/// lives in the binding's namespace.
fn subjects(subjects: Option<Vec<rbacv1::Subject>>, binding_ns: Option<&str>) -> Vec<Subject> {
    subjects
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| match s.kind.as_str() {
            "ServiceAccount" => {
                let ns = s
                    .namespace
                    .filter(|ns| !ns.is_empty())
                    .or_else(|| binding_ns.map(str::to_string));
                match ns {
                    Some(ns) => Some(Subject::service_account(ns, s.name)),
                    None => {
                        warn!("Skipping service account subject {} without namespace", s.name);
                        None
                    }
                }
            }
            "User" => Some(Subject::user(s.name)),
            "Group" => Some(Subject::group(s.name)),
            other => {
                warn!("Skipping subject {} of unknown kind {}", s.name, other);
                None
            }
        })
        .collect()
}

pub fn role(role: rbacv1::Role) -> Result<RbacObject, SourceError> {
    let (name, namespace, resource_version) = identity(WatchKind::Roles, role.metadata)?;
    let namespace = namespace.ok_or_else(|| invalid(WatchKind::Roles, "missing namespace"))?;
    Ok(RbacObject::Role(Role {
        name,
        namespace: Some(namespace),
        rules: role.rules.unwrap_or_default().into_iter().map(rule).collect(),
        resource_version,
    }))
}

pub fn cluster_role(role: rbacv1::ClusterRole) -> Result<RbacObject, SourceError> {
    let (name, _, resource_version) = identity(WatchKind::ClusterRoles, role.metadata)?;
    Ok(RbacObject::Role(Role {
        name,
        namespace: None,
        rules: role.rules.unwrap_or_default().into_iter().map(rule).collect(),
        resource_version,
    }))
}

pub fn role_binding(binding: rbacv1::RoleBinding) -> Result<RbacObject, SourceError> {
    let kind = WatchKind::RoleBindings;
    let (name, namespace, resource_version) = identity(kind, binding.metadata)?;
    let namespace = namespace.ok_or_else(|| invalid(kind, "missing namespace"))?;
    Ok(RbacObject::RoleBinding(RoleBinding {
        role_ref: role_ref(kind, binding.role_ref)?,
        subjects: subjects(binding.subjects, Some(&namespace)),
        name,
        namespace,
        resource_version,
    }))
}

pub fn cluster_role_binding(
    binding: rbacv1::ClusterRoleBinding,
) -> Result<RbacObject, SourceError> {
    let kind = WatchKind::ClusterRoleBindings;
    let (name, _, resource_version) = identity(kind, binding.metadata)?;
    Ok(RbacObject::ClusterRoleBinding(ClusterRoleBinding {
        name,
        role_ref: role_ref(kind, binding.role_ref)?,
        subjects: subjects(binding.subjects, None),
        resource_version,
    }))
}
