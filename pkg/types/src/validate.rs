use anyhow::{Result, bail};

use crate::access::{AccessRequest, ResourceRef};

/// Validate a Kubernetes-style namespace name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Reject requests that could never match a rule.
pub fn validate_access_request(req: &AccessRequest) -> Result<()> {
    if req.subject.name.trim().is_empty() {
        bail!("subject name must not be empty");
    }
    if req.verb.trim().is_empty() {
        bail!("verb must not be empty");
    }
    if req.resource.trim().is_empty() {
        bail!("resource must not be empty");
    }
    if let Some(ns) = &req.namespace {
        validate_name(ns)?;
    }
    Ok(())
}

/// Normalize a resource reference the way single requests are: an empty
/// namespace means cluster scope.
pub fn normalize_resource_ref(mut r: ResourceRef) -> Result<ResourceRef> {
    if r.resource.trim().is_empty() {
        bail!("resource must not be empty");
    }
    r.namespace = r.namespace.filter(|ns| !ns.is_empty());
    if let Some(ns) = &r.namespace {
        validate_name(ns)?;
    }
    Ok(r)
}
