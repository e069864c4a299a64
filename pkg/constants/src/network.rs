//! Network-related constants.

/// Default port for the authorization API server.
pub const DEFAULT_API_PORT: u16 = 8470;

/// Default API server address used by `fsauthzctl`.
pub const DEFAULT_API_ADDR: &str = "http://127.0.0.1:8470";

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
