//! Feature-store actions and their verb expansion.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Action being secured, in CRUD and feature-store terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzedAction {
    All,
    Create,
    Read,
    Update,
    Delete,
    /// Query on any store.
    Query,
    QueryOnline,
    QueryOffline,
    /// Write to any store.
    Write,
    WriteOnline,
    WriteOffline,
}

const ATOMIC: [AuthzedAction; 8] = [
    AuthzedAction::Create,
    AuthzedAction::Read,
    AuthzedAction::Update,
    AuthzedAction::Delete,
    AuthzedAction::QueryOnline,
    AuthzedAction::QueryOffline,
    AuthzedAction::WriteOnline,
    AuthzedAction::WriteOffline,
];

impl AuthzedAction {
    /// The atomic actions this one stands for.
    pub fn expand(self) -> &'static [AuthzedAction] {
        match self {
            AuthzedAction::All => &ATOMIC,
            AuthzedAction::Query => &ATOMIC[4..6],
            AuthzedAction::Write => &ATOMIC[6..8],
            AuthzedAction::Create => &ATOMIC[0..1],
            AuthzedAction::Read => &ATOMIC[1..2],
            AuthzedAction::Update => &ATOMIC[2..3],
            AuthzedAction::Delete => &ATOMIC[3..4],
            AuthzedAction::QueryOnline => &ATOMIC[4..5],
            AuthzedAction::QueryOffline => &ATOMIC[5..6],
            AuthzedAction::WriteOnline => &ATOMIC[6..7],
            AuthzedAction::WriteOffline => &ATOMIC[7..8],
        }
    }

    /// Parse a role-rule verb naming an action.
    pub fn from_verb(verb: &str) -> Option<Self> {
        let action = match verb {
            "all" => AuthzedAction::All,
            "create" => AuthzedAction::Create,
            "read" => AuthzedAction::Read,
            "update" => AuthzedAction::Update,
            "delete" => AuthzedAction::Delete,
            "query" => AuthzedAction::Query,
            "query_online" => AuthzedAction::QueryOnline,
            "query_offline" => AuthzedAction::QueryOffline,
            "write" => AuthzedAction::Write,
            "write_online" => AuthzedAction::WriteOnline,
            "write_offline" => AuthzedAction::WriteOffline,
            _ => return None,
        };
        Some(action)
    }

    /// Whether granting `self` also grants `other`: `all` covers everything,
    /// `query` and `write` cover their online and offline halves.
    pub fn covers(self, other: AuthzedAction) -> bool {
        let granted = self.expand();
        other.expand().iter().all(|a| granted.contains(a))
    }

    /// Verb name used in role rules.
    pub fn verb(self) -> &'static str {
        match self {
            AuthzedAction::All => "all",
            AuthzedAction::Create => "create",
            AuthzedAction::Read => "read",
            AuthzedAction::Update => "update",
            AuthzedAction::Delete => "delete",
            AuthzedAction::Query => "query",
            AuthzedAction::QueryOnline => "query_online",
            AuthzedAction::QueryOffline => "query_offline",
            AuthzedAction::Write => "write",
            AuthzedAction::WriteOnline => "write_online",
            AuthzedAction::WriteOffline => "write_offline",
        }
    }
}

/// Distinct verbs that must all be granted for `actions` to be allowed.
pub fn required_verbs(actions: &[AuthzedAction]) -> BTreeSet<&'static str> {
    actions
        .iter()
        .flat_map(|a| a.expand().iter().map(|atomic| atomic.verb()))
        .collect()
}
