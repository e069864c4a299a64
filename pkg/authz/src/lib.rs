//! Identity-to-permission resolution.
//!
//! [`Authorize`] is what request handlers hold. [`resolver::Resolver`] answers
//! from the watched RBAC index; [`AllowAll`] is used when authorization is
//! switched off.

pub mod decision_cache;
pub mod resolver;

use pkg_types::access::{AccessRequest, ResourceRef, Verdict};
use pkg_types::action::{AuthzedAction, required_verbs};

pub trait Authorize: Send + Sync {
    /// Never fails: always a verdict from the best snapshot currently held.
    fn authorize(&self, req: &AccessRequest) -> Verdict;

    /// Allow only if every verb behind `actions` is allowed. The verb of
    /// `base` is ignored. No actions is a Deny.
    fn authorize_actions(&self, base: &AccessRequest, actions: &[AuthzedAction]) -> Verdict {
        let verbs = required_verbs(actions);
        if verbs.is_empty() {
            return Verdict::Deny;
        }
        let allowed = verbs.into_iter().all(|verb| {
            let mut req = base.clone();
            req.verb = verb.to_string();
            self.authorize(&req).is_allowed()
        });
        Verdict::from(allowed)
    }

    /// The subset of `resources` `base.subject` may apply `base.verb` to,
    /// in input order.
    fn permitted(&self, base: &AccessRequest, resources: Vec<ResourceRef>) -> Vec<ResourceRef> {
        resources
            .into_iter()
            .filter(|r| {
                let mut req = base.clone();
                req.resource = r.resource.clone();
                req.namespace = r.namespace.clone();
                req.resource_name = r.name.clone();
                self.authorize(&req).is_allowed()
            })
            .collect()
    }
}

/// Grants everything. Used when authorization is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorize for AllowAll {
    fn authorize(&self, _req: &AccessRequest) -> Verdict {
        Verdict::Allow
    }
}
