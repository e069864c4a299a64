//! The seam between watch ingest and wherever RBAC objects come from.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pkg_types::event::{ListSnapshot, RbacEvent, WatchKind};
use pkg_types::rbac::ResourceVersion;
use thiserror::Error;

pub type EventStream = BoxStream<'static, Result<RbacEvent, SourceError>>;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Network trouble, server errors, closed connections. Retried.
    #[error("source unavailable: {0}")]
    Transient(String),
    /// The watch cursor is older than the source retains.
    #[error("resource version {0} is too old")]
    Expired(String),
    #[error("{kind} request timed out")]
    Timeout { kind: WatchKind },
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// One object could not be decoded; the rest of the stream is usable.
    #[error("cannot decode {kind} object: {reason}")]
    Decode { kind: WatchKind, reason: String },
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("service identity may not {verb} {kind}")]
    PermissionDenied { kind: WatchKind, verb: String },
}

/// A source of RBAC objects with list-then-watch semantics.
///
/// `watch` must deliver every change with a version above `from`, so a list
/// at version `v` followed by a watch from `v` misses nothing.
#[async_trait]
pub trait RbacSource: Send + Sync + 'static {
    async fn list(&self, kind: WatchKind) -> Result<ListSnapshot, SourceError>;

    async fn watch(&self, kind: WatchKind, from: ResourceVersion)
    -> Result<EventStream, SourceError>;

    /// Whether this service's own identity may perform `verb` on `kind`.
    async fn can_i(&self, kind: WatchKind, verb: &str) -> Result<bool, SourceError>;
}
