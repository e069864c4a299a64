//! Centralized constants for the fsauthz project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod cache;
pub mod network;
pub mod paths;
pub mod rbac;
pub mod state;
