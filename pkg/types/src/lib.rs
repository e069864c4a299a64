pub mod access;
pub mod action;
pub mod config;
pub mod event;
pub mod rbac;
pub mod validate;
