mod backend;
mod local_backend;
mod redis_backend;
mod service;

pub use service::{Cache, CacheService, NO_TTL};

#[cfg(test)]
mod tests;
