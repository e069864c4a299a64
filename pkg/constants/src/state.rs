//! Index / watch ingest constants.

/// Number of recent grant deltas kept for replay to late subscribers.
pub const DELTA_LOG_CAPACITY: usize = 1024;

/// Capacity of the live grant-delta broadcast channel.
pub const DELTA_BROADCAST_CAPACITY: usize = 1024;

/// Per-attempt timeout for list / watch establishment, in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// First reconnect delay, in milliseconds. Doubles on every failure.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Upper bound for the reconnect delay, in seconds.
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 30;

/// Consecutive re-list failures after which a watch reports `degraded`.
pub const DEFAULT_DEGRADED_AFTER_FAILURES: u32 = 3;
