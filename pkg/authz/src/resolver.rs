use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use pkg_constants::rbac::WILDCARD;
use pkg_metrics::ResolverMetrics;
use pkg_state::index::RbacIndex;
use pkg_state::store::{InvalidationSink, RbacStore};
use pkg_types::access::{AccessRequest, Verdict};
use pkg_types::action::AuthzedAction;
use pkg_types::rbac::{PolicyRule, RoleKey};
use tracing::debug;

use crate::Authorize;
use crate::decision_cache::DecisionCache;

/// A verdict plus what it depended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// For Allow: the role that matched. For Deny: every role consulted,
    /// including ones that were not (yet) resolvable.
    pub roles: BTreeSet<RoleKey>,
    /// Index generation the decision was computed against.
    pub generation: u64,
}

/// Decide `req` against one index snapshot.
///
/// Pure: the same snapshot and request always yield the same decision.
/// Allow is additive over every binding of every principal; there is no deny
/// rule, and a binding whose role is unknown contributes nothing.
pub fn evaluate(index: &RbacIndex, req: &AccessRequest) -> Decision {
    let generation = index.generation();
    let mut consulted = BTreeSet::new();

    for principal in req.principals() {
        for binding in index.bindings_for(&principal) {
            if let Some(scope) = binding.scope() {
                if req.namespace.as_deref() != Some(scope) {
                    continue;
                }
            }

            let role_key = binding.role_key();
            let Some(role) = index.role(&role_key) else {
                consulted.insert(role_key);
                continue;
            };
            if role.rules.iter().any(|rule| rule_allows(rule, req)) {
                return Decision {
                    verdict: Verdict::Allow,
                    roles: BTreeSet::from([role_key]),
                    generation,
                };
            }
            consulted.insert(role_key);
        }
    }

    Decision {
        verdict: Verdict::Deny,
        roles: consulted,
        generation,
    }
}

fn slot_matches(values: &[String], wanted: &str) -> bool {
    values.iter().any(|v| v == WILDCARD || v == wanted)
}

/// Literal and `*` matches, plus feature-store action verbs granted through
/// a broader action (`all`, `query`, `write`).
fn verb_matches(verbs: &[String], wanted: &str) -> bool {
    if slot_matches(verbs, wanted) {
        return true;
    }
    let Some(wanted) = AuthzedAction::from_verb(wanted) else {
        return false;
    };
    verbs
        .iter()
        .filter_map(|v| AuthzedAction::from_verb(v))
        .any(|granted| granted.covers(wanted))
}

/// Whether a single rule grants `req`.
pub fn rule_allows(rule: &PolicyRule, req: &AccessRequest) -> bool {
    if !verb_matches(&rule.verbs, &req.verb) || !slot_matches(&rule.resources, &req.resource) {
        return false;
    }
    if let Some(group) = &req.api_group {
        if !slot_matches(&rule.api_groups, group) {
            return false;
        }
    }
    if !rule.resource_names.is_empty() {
        return match &req.resource_name {
            Some(name) => rule.resource_names.iter().any(|n| n == name),
            None => false,
        };
    }
    true
}

/// Authorization Resolver over the shared index, fronted by the decision cache.
pub struct Resolver {
    store: RbacStore,
    cache: Arc<DecisionCache>,
    metrics: Arc<ResolverMetrics>,
}

impl Resolver {
    /// Build the store and a resolver whose cache is wired as the store's
    /// invalidation sink.
    pub fn wire(
        cache_capacity: usize,
        cache_ttl: Duration,
        metrics: Arc<ResolverMetrics>,
    ) -> (RbacStore, Arc<Resolver>) {
        let cache = Arc::new(DecisionCache::new(
            cache_capacity,
            cache_ttl,
            metrics.clone(),
        ));
        let store = RbacStore::new(vec![cache.clone() as Arc<dyn InvalidationSink>]);
        let resolver = Arc::new(Resolver {
            store: store.clone(),
            cache,
            metrics,
        });
        (store, resolver)
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Evaluate without consulting or filling the cache.
    pub fn decide(&self, req: &AccessRequest) -> Decision {
        let index = self.store.read();
        evaluate(&index, req)
    }
}

impl Authorize for Resolver {
    fn authorize(&self, req: &AccessRequest) -> Verdict {
        let req = req.clone().normalized();
        if let Some(verdict) = self.cache.get(&req) {
            self.metrics.record_verdict(verdict.is_allowed());
            return verdict;
        }

        let decision = self.decide(&req);
        debug!(
            subject = %req.subject,
            verb = %req.verb,
            resource = %req.resource,
            namespace = req.namespace.as_deref().unwrap_or(""),
            verdict = decision.verdict.as_str(),
            generation = decision.generation,
            "Authorization decided"
        );
        self.metrics.record_verdict(decision.verdict.is_allowed());
        let verdict = decision.verdict;
        self.cache.insert(req, &decision);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::event::{ObjectEvent, RbacEvent};
    use pkg_types::rbac::{
        ClusterRoleBinding, ResourceVersion, Role, RoleBinding, RoleRef, RoleRefKind, Subject,
    };

    fn rule(verbs: &[&str], resources: &[&str]) -> PolicyRule {
        PolicyRule {
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn role(ns: Option<&str>, name: &str, rules: Vec<PolicyRule>, rv: u64) -> RbacEvent {
        RbacEvent::Role(ObjectEvent::Applied(Role {
            name: name.to_string(),
            namespace: ns.map(str::to_string),
            rules,
            resource_version: ResourceVersion(rv),
        }))
    }

    fn role_binding(
        ns: &str,
        name: &str,
        role_ref: RoleRef,
        subjects: Vec<Subject>,
        rv: u64,
    ) -> RbacEvent {
        RbacEvent::RoleBinding(ObjectEvent::Applied(RoleBinding {
            name: name.to_string(),
            namespace: ns.to_string(),
            role_ref,
            subjects,
            resource_version: ResourceVersion(rv),
        }))
    }

    fn cluster_binding(name: &str, role: &str, subjects: Vec<Subject>, rv: u64) -> RbacEvent {
        RbacEvent::ClusterRoleBinding(ObjectEvent::Applied(ClusterRoleBinding {
            name: name.to_string(),
            role_ref: RoleRef {
                kind: RoleRefKind::ClusterRole,
                name: role.to_string(),
            },
            subjects,
            resource_version: ResourceVersion(rv),
        }))
    }

    fn role_ref(kind: RoleRefKind, name: &str) -> RoleRef {
        RoleRef {
            kind,
            name: name.to_string(),
        }
    }

    fn svc1() -> Subject {
        Subject::service_account("ns1", "svc1")
    }

    fn resolver() -> (RbacStore, Arc<Resolver>) {
        Resolver::wire(1024, Duration::from_secs(60), Arc::new(ResolverMetrics::new()))
    }

    fn can(r: &Resolver, subject: Subject, verb: &str, resource: &str, ns: Option<&str>) -> Verdict {
        let mut req = AccessRequest::new(subject, verb, resource);
        req.namespace = ns.map(str::to_string);
        r.authorize(&req)
    }

    /// Role `reader` = get/list on feature-view in ns1, bound to sa svc1 in ns1.
    fn reader_scenario() -> (RbacStore, Arc<Resolver>) {
        let (store, r) = resolver();
        store.apply(role(Some("ns1"), "reader", vec![rule(&["get", "list"], &["feature-view"])], 1));
        store.apply(role_binding(
            "ns1",
            "reader-binding",
            role_ref(RoleRefKind::Role, "reader"),
            vec![svc1()],
            2,
        ));
        (store, r)
    }

    #[test]
    fn test_reader_scenario() {
        let (_store, r) = reader_scenario();
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns1")), Verdict::Allow);
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns2")), Verdict::Deny);
        assert_eq!(can(&r, svc1(), "delete", "feature-view", Some("ns1")), Verdict::Deny);
    }

    #[test]
    fn test_round_trip_allows_exactly_the_rules() {
        let (_store, r) = reader_scenario();
        for verb in ["get", "list"] {
            assert_eq!(can(&r, svc1(), verb, "feature-view", Some("ns1")), Verdict::Allow);
        }
        for verb in ["create", "update", "delete", "watch"] {
            assert_eq!(can(&r, svc1(), verb, "feature-view", Some("ns1")), Verdict::Deny);
        }
        assert_eq!(can(&r, svc1(), "get", "entities", Some("ns1")), Verdict::Deny);
        assert_eq!(can(&r, svc1(), "get", "feature-view", None), Verdict::Deny);
    }

    #[test]
    fn test_unbound_subjects_are_denied() {
        let (_store, r) = reader_scenario();
        let stranger = Subject::service_account("ns1", "stranger");
        assert_eq!(can(&r, stranger.clone(), "*", "*", Some("ns1")), Verdict::Deny);
        assert_eq!(can(&r, stranger, "get", "feature-view", None), Verdict::Deny);
        assert_eq!(can(&r, Subject::user("nobody"), "*", "*", None), Verdict::Deny);
    }

    #[test]
    fn test_cluster_binding_spans_namespaces_role_binding_does_not() {
        let (store, r) = resolver();
        let alice = Subject::user("alice");
        let bob = Subject::user("bob");
        store.apply(role(None, "viewer", vec![rule(&["get"], &["entities"])], 1));
        store.apply(cluster_binding("viewers", "viewer", vec![alice.clone()], 2));
        store.apply(role_binding(
            "ns1",
            "ns1-viewers",
            role_ref(RoleRefKind::ClusterRole, "viewer"),
            vec![bob.clone()],
            3,
        ));

        for ns in [Some("ns1"), Some("ns2"), None] {
            assert_eq!(can(&r, alice.clone(), "get", "entities", ns), Verdict::Allow);
        }
        assert_eq!(can(&r, bob.clone(), "get", "entities", Some("ns1")), Verdict::Allow);
        assert_eq!(can(&r, bob.clone(), "get", "entities", Some("ns2")), Verdict::Deny);
        assert_eq!(can(&r, bob, "get", "entities", None), Verdict::Deny);
    }

    #[test]
    fn test_wildcards_match_any_value() {
        let (store, r) = resolver();
        store.apply(role(None, "admin", vec![rule(&["*"], &["*"])], 1));
        store.apply(cluster_binding("admins", "admin", vec![svc1()], 2));
        assert_eq!(can(&r, svc1(), "delete", "projects", Some("ns9")), Verdict::Allow);
        assert_eq!(can(&r, svc1(), "query_online", "feature-views", None), Verdict::Allow);
    }

    #[test]
    fn test_dangling_binding_does_not_mask_other_grants() {
        let (store, r) = reader_scenario();
        store.apply(role_binding(
            "ns1",
            "ghost-binding",
            role_ref(RoleRefKind::Role, "ghost"),
            vec![svc1()],
            3,
        ));
        assert_eq!(store.read().dangling_bindings(), 1);
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns1")), Verdict::Allow);
        assert_eq!(can(&r, svc1(), "delete", "feature-view", Some("ns1")), Verdict::Deny);

        // The role arriving later resolves the binding.
        store.apply(role(Some("ns1"), "ghost", vec![rule(&["delete"], &["feature-view"])], 4));
        assert_eq!(can(&r, svc1(), "delete", "feature-view", Some("ns1")), Verdict::Allow);
    }

    #[test]
    fn test_group_bindings_apply_to_members() {
        let (store, r) = resolver();
        store.apply(role(None, "writer", vec![rule(&["write_online"], &["feature-views"])], 1));
        store.apply(cluster_binding("ml-writers", "writer", vec![Subject::group("ml")], 2));

        let req = AccessRequest::new(Subject::user("carol"), "write_online", "feature-views");
        assert_eq!(r.authorize(&req), Verdict::Deny);
        assert_eq!(r.authorize(&req.clone().with_groups(["ml"])), Verdict::Allow);
    }

    #[test]
    fn test_service_accounts_inherit_implicit_group_bindings() {
        let (store, r) = resolver();
        store.apply(role(None, "viewer", vec![rule(&["get"], &["projects"])], 1));
        store.apply(cluster_binding(
            "all-sas",
            "viewer",
            vec![Subject::group("system:serviceaccounts:ns1")],
            2,
        ));
        assert_eq!(can(&r, svc1(), "get", "projects", None), Verdict::Allow);
        assert_eq!(
            can(&r, Subject::service_account("ns2", "svc2"), "get", "projects", None),
            Verdict::Deny
        );
    }

    #[test]
    fn test_api_group_and_resource_names_narrow_rules() {
        let mut named = rule(&["get"], &["feature-views"]);
        named.api_groups = vec!["feast.dev".to_string()];
        named.resource_names = vec!["driver_stats".to_string()];

        let base = AccessRequest::new(svc1(), "get", "feature-views");
        assert!(!rule_allows(&named, &base));
        assert!(rule_allows(&named, &base.clone().with_resource_name("driver_stats")));
        assert!(!rule_allows(&named, &base.clone().with_resource_name("other")));
        assert!(rule_allows(
            &named,
            &base
                .clone()
                .with_resource_name("driver_stats")
                .with_api_group("feast.dev")
        ));
        assert!(!rule_allows(
            &named,
            &base.with_resource_name("driver_stats").with_api_group("apps")
        ));
    }

    #[test]
    fn test_role_update_removing_verb_invalidates_cached_allow() {
        let (store, r) = reader_scenario();
        assert_eq!(can(&r, svc1(), "list", "feature-view", Some("ns1")), Verdict::Allow);
        assert_eq!(r.cache().len(), 1);

        store.apply(role(Some("ns1"), "reader", vec![rule(&["get"], &["feature-view"])], 10));
        assert_eq!(can(&r, svc1(), "list", "feature-view", Some("ns1")), Verdict::Deny);
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns1")), Verdict::Allow);
    }

    #[test]
    fn test_binding_removal_invalidates_cached_allow() {
        let (store, r) = reader_scenario();
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns1")), Verdict::Allow);

        store.apply(RbacEvent::RoleBinding(ObjectEvent::Deleted(RoleBinding {
            name: "reader-binding".to_string(),
            namespace: "ns1".to_string(),
            role_ref: role_ref(RoleRefKind::Role, "reader"),
            subjects: vec![svc1()],
            resource_version: ResourceVersion(11),
        })));
        assert_eq!(can(&r, svc1(), "get", "feature-view", Some("ns1")), Verdict::Deny);
    }

    #[test]
    fn test_cached_deny_flips_when_dangling_role_arrives() {
        let (store, r) = resolver();
        store.apply(role_binding(
            "ns1",
            "early",
            role_ref(RoleRefKind::Role, "late"),
            vec![svc1()],
            1,
        ));
        assert_eq!(can(&r, svc1(), "get", "entities", Some("ns1")), Verdict::Deny);

        store.apply(role(Some("ns1"), "late", vec![rule(&["get"], &["entities"])], 2));
        assert_eq!(can(&r, svc1(), "get", "entities", Some("ns1")), Verdict::Allow);
    }

    #[test]
    fn test_decision_computed_before_a_write_is_not_cached() {
        let (store, r) = reader_scenario();
        let req = AccessRequest::new(svc1(), "list", "feature-view")
            .in_namespace("ns1")
            .normalized();

        // Computed against the old index, inserted after the role changed.
        let stale = r.decide(&req);
        store.apply(role(Some("ns1"), "reader", vec![rule(&["get"], &["feature-view"])], 10));
        assert!(!r.cache().insert(req.clone(), &stale));
        assert_eq!(r.authorize(&req), Verdict::Deny);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let (store, _r) = reader_scenario();
        let req = AccessRequest::new(svc1(), "get", "feature-view").in_namespace("ns1");
        let index = store.read();
        let first = evaluate(&index, &req);
        for _ in 0..10 {
            assert_eq!(evaluate(&index, &req), first);
        }
    }

    #[test]
    fn test_actions_require_every_expanded_verb() {
        let (store, r) = resolver();
        store.apply(role(
            None,
            "online-reader",
            vec![rule(&["read", "query_online"], &["feature-views"])],
            1,
        ));
        store.apply(cluster_binding("readers", "online-reader", vec![svc1()], 2));

        let base = AccessRequest::new(svc1(), "", "feature-views");
        assert_eq!(
            r.authorize_actions(&base, &[AuthzedAction::Read, AuthzedAction::QueryOnline]),
            Verdict::Allow
        );
        // query expands to online and offline; offline is missing.
        assert_eq!(r.authorize_actions(&base, &[AuthzedAction::Query]), Verdict::Deny);
        assert_eq!(r.authorize_actions(&base, &[]), Verdict::Deny);
    }

    #[test]
    fn test_composite_rule_verbs_grant_composite_actions() {
        let (store, r) = resolver();
        store.apply(role(None, "admin", vec![rule(&["query", "write"], &["feature-views"])], 1));
        store.apply(cluster_binding("admins", "admin", vec![Subject::user("admin")], 2));

        let base = AccessRequest::new(Subject::user("admin"), "", "feature-views");
        assert_eq!(
            r.authorize_actions(&base, &[AuthzedAction::Query, AuthzedAction::Write]),
            Verdict::Allow
        );
        assert_eq!(
            r.authorize_actions(&base, &[AuthzedAction::WriteOffline]),
            Verdict::Allow
        );
        assert_eq!(r.authorize_actions(&base, &[AuthzedAction::Read]), Verdict::Deny);
        assert_eq!(
            can(&r, Subject::user("admin"), "query_online", "feature-views", None),
            Verdict::Allow
        );
    }

    #[test]
    fn test_all_rule_verb_grants_every_action() {
        let (store, r) = resolver();
        store.apply(role(None, "owner", vec![rule(&["all"], &["feature-views"])], 1));
        store.apply(cluster_binding("owners", "owner", vec![Subject::user("admin")], 2));

        let base = AccessRequest::new(Subject::user("admin"), "", "feature-views");
        assert_eq!(r.authorize_actions(&base, &[AuthzedAction::Read]), Verdict::Allow);
        assert_eq!(r.authorize_actions(&base, &[AuthzedAction::All]), Verdict::Allow);
        assert_eq!(
            can(&r, Subject::user("admin"), "read", "feature-views", None),
            Verdict::Allow
        );
        // `all` names feature-store actions only, not arbitrary verbs.
        assert_eq!(
            can(&r, Subject::user("admin"), "get", "feature-views", None),
            Verdict::Deny
        );
        assert_eq!(
            can(&r, Subject::user("admin"), "read", "entities", None),
            Verdict::Deny
        );
    }
}
