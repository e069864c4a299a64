//! Watch Ingest.
//!
//! [`supervisor::Supervisor`] checks the service's own permissions against the
//! RBAC source, then runs one [`ingest::WatchController`] per watched kind,
//! each feeding the shared [`pkg_state::store::RbacStore`].

pub mod backoff;
pub mod decode;
pub mod health;
pub mod ingest;
pub mod kube_source;
#[cfg(test)]
mod memory;
pub mod source;
pub mod supervisor;
