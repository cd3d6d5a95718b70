use super::backend::CacheBackend;
use super::local_backend::LocalBackend;
use super::redis_backend::RedisBackend;
use crate::errors::CacheError;
use deadpool_redis::Pool;
use std::sync::Arc;
use std::time::Duration;

/// TTL sentinel: the entry never expires.
pub const NO_TTL: Option<Duration> = None;

/// Narrow cache capability consumed by the configuration service.
///
/// A miss is reported as [`CacheError::NotFound`] so callers can tell it
/// apart from a backend failure.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError>;
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;
    /// Stores `value` only if `key` holds nothing yet. Returns whether it was stored.
    async fn set_bytes_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

pub struct CacheService {
    pub(crate) backend: Arc<dyn CacheBackend>,
    pub(crate) namespace: String,
}

impl CacheService {
    pub fn new(pool: Option<Pool>, namespace: String, compression_threshold: Option<usize>) -> Self {
        let threshold = compression_threshold.unwrap_or(4096);

        let backend: Arc<dyn CacheBackend> = match pool {
            Some(p) => Arc::new(RedisBackend::new(p, threshold)),
            None => Arc::new(LocalBackend::new()),
        };

        CacheService { backend, namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn cache_id(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace)
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend.get(&self.cache_id(key)).await
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.backend.set(&self.cache_id(key), value, ttl).await
    }

    pub async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.backend.set_nx(&self.cache_id(key), value, ttl).await
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.backend.del(&self.cache_id(key)).await
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.backend.ping().await
    }
}

#[async_trait::async_trait]
impl Cache for CacheService {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.get(key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.set(key, value, ttl).await
    }

    async fn set_bytes_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.set_nx(key, value, ttl).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        CacheService::ping(self).await
    }
}
