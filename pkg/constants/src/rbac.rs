//! RBAC vocabulary constants.

/// API group of the Kubernetes RBAC objects.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Wildcard accepted in verb, resource and API group slots of a rule.
pub const WILDCARD: &str = "*";

/// Verbs the resolver's own identity must hold on every watched kind.
pub const REQUIRED_SOURCE_VERBS: [&str; 3] = ["get", "list", "watch"];

/// Group every service account belongs to.
pub const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";

/// Username prefix of service accounts (`system:serviceaccount:<ns>:<name>`).
pub const SERVICE_ACCOUNT_USER_PREFIX: &str = "system:serviceaccount:";

/// Feature-store resource kinds protected by the resolver.
pub const FEATURE_STORE_RESOURCE_KINDS: [&str; 9] = [
    "projects",
    "feature-views",
    "on-demand-feature-views",
    "stream-feature-views",
    "entities",
    "feature-services",
    "data-sources",
    "saved-datasets",
    "permissions",
];
