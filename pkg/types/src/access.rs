use serde::{Deserialize, Serialize};

use crate::rbac::Subject;

/// "Can `subject` perform `verb` on `resource` (in `namespace`)?"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: Subject,
    /// Groups the caller resolved for the subject.
    #[serde(default)]
    pub groups: Vec<String>,
    pub verb: String,
    /// Resource kind, e.g. `feature-views`.
    pub resource: String,
    /// `None` for cluster-scoped resources.
    #[serde(default)]
    pub namespace: Option<String>,
    /// When set, rules must list this API group (or `*`).
    #[serde(default)]
    pub api_group: Option<String>,
    /// When set, rules restricted to named objects must include it.
    #[serde(default)]
    pub resource_name: Option<String>,
}

impl AccessRequest {
    pub fn new(subject: Subject, verb: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            subject,
            groups: Vec::new(),
            verb: verb.into(),
            resource: resource.into(),
            namespace: None,
            api_group: None,
            resource_name: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_api_group(mut self, group: impl Into<String>) -> Self {
        self.api_group = Some(group.into());
        self
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Sorted, de-duplicated groups so equivalent requests share a cache key.
    pub fn normalized(mut self) -> Self {
        self.groups.sort();
        self.groups.dedup();
        self
    }

    /// Every principal whose bindings apply: the subject, its declared groups
    /// and its implicit groups.
    pub fn principals(&self) -> Vec<Subject> {
        let mut principals = Vec::with_capacity(1 + self.groups.len() + 2);
        principals.push(self.subject.clone());
        principals.extend(self.groups.iter().map(Subject::group));
        for group in self.subject.implicit_groups() {
            if !principals.contains(&group) {
                principals.push(group);
            }
        }
        principals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
        }
    }
}

impl From<bool> for Verdict {
    fn from(allowed: bool) -> Self {
        if allowed { Verdict::Allow } else { Verdict::Deny }
    }
}

/// A resource the caller wants filtered by `permitted`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
