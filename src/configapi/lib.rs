//! Shared configuration: the HTTP store, the per-process client and the
//! hostname policy built on top of it.

pub mod client;
pub mod constraint;
pub mod server;
pub mod service;

pub use client::{ConfigClient, FORBIDDEN_HOSTNAMES_KEY, ForbiddenHostname, HttpConfigClient};
pub use constraint::check_hostname_allowed;
pub use server::{ConfigApiState, apply_default_values, router};
pub use service::ConfigApi;
