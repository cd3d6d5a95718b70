//! Byte-oriented key/value cache with optional TTL.
//!
//! The in-memory backend is used when no Redis endpoint is configured, which
//! keeps single-node runs and tests free of external services.

mod cache_service;

pub use cache_service::{Cache, CacheService, NO_TTL};
