//! Decision cache constants.

/// How long a memoized verdict may be served, in milliseconds.
pub const DEFAULT_DECISION_TTL_MS: u64 = 5_000;

/// Maximum number of memoized verdicts before LRU eviction kicks in.
pub const DEFAULT_DECISION_CAPACITY: usize = 10_000;
