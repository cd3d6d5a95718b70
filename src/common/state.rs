use crate::cacheable::CacheService;
use crate::common::model::config::Config;
use crate::errors::Result;
use crate::queue::{EventBus, LocalQueue, MqBackend, NackPolicy, Publisher, RedisQueue};
use crate::utils::connector::{check_redis_pool, create_redis_pool};
use deadpool_redis::Pool;
use log::info;
use std::sync::Arc;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_CACHE_NAMESPACE: &str = "configuration";

/// Everything a process shares with its components. Built once at startup
/// and passed by reference.
#[derive(Clone)]
pub struct State {
    pub config: Arc<Config>,
    pub event_bus: Arc<EventBus>,
    cache: Arc<CacheService>,
}

impl State {
    /// Connects the broker and the cache described by `config`, falling back
    /// to in-memory implementations when no Redis endpoint is configured.
    pub async fn new(config: Config) -> Result<Self> {
        let policy = nack_policy(&config);
        let capacity = config
            .hub
            .as_ref()
            .and_then(|h| h.capacity)
            .unwrap_or(DEFAULT_CAPACITY);

        let backend: Arc<dyn MqBackend> =
            match config.hub.as_ref().and_then(|h| h.redis.as_ref()) {
                Some(redis) => {
                    let pool = create_redis_pool(redis)?;
                    check_redis_pool(&pool).await?;
                    info!("Hub connected to Redis (namespace {})", config.namespace());
                    let minid_time = config.hub.as_ref().and_then(|h| h.minid_time).unwrap_or(0);
                    Arc::new(
                        RedisQueue::new(pool, config.namespace(), policy).with_retention(minid_time),
                    )
                }
                None => {
                    info!("No hub endpoint configured, using in-memory broker");
                    Arc::new(LocalQueue::new(policy))
                }
            };

        let cache_pool = match config.cache.as_ref().and_then(|c| c.redis.as_ref()) {
            Some(redis) => {
                let pool = create_redis_pool(redis)?;
                check_redis_pool(&pool).await?;
                info!("cache pool connect successfully");
                Some(pool)
            }
            None => None,
        };

        let cache = build_cache(&config, cache_pool);
        Ok(Self {
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::new(backend, capacity)),
            cache,
        })
    }

    /// State over an existing bus with an in-memory cache.
    pub fn with_event_bus(config: Config, event_bus: Arc<EventBus>) -> Self {
        let cache = build_cache(&config, None);
        Self {
            config: Arc::new(config),
            event_bus,
            cache,
        }
    }

    pub fn broker(&self) -> Arc<dyn MqBackend> {
        self.event_bus.backend().clone()
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        self.event_bus.clone()
    }

    /// Cache holding configuration entries.
    pub fn cache_service(&self) -> Arc<CacheService> {
        self.cache.clone()
    }
}

fn build_cache(config: &Config, pool: Option<Pool>) -> Arc<CacheService> {
    let cache = config.cache.as_ref();
    let namespace = cache
        .and_then(|c| c.namespace.clone())
        .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string());
    Arc::new(CacheService::new(
        pool,
        namespace,
        cache.and_then(|c| c.compression_threshold),
    ))
}

fn nack_policy(config: &Config) -> NackPolicy {
    let defaults = NackPolicy::default();
    match &config.hub {
        Some(hub) => NackPolicy {
            max_retries: hub.max_retries.unwrap_or(defaults.max_retries),
            backoff_ms: hub.backoff_ms.unwrap_or(defaults.backoff_ms),
        },
        None => defaults,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacheable::{Cache, NO_TTL};

    #[tokio::test]
    async fn test_state_without_redis_is_in_memory() {
        let config = Config::parse(
            r#"
            name = "configapi"
            [hub]
            max_retries = 7
            "#,
        )
        .unwrap();
        assert_eq!(nack_policy(&config).max_retries, 7);
        assert_eq!(nack_policy(&config).backoff_ms, 500);

        let state = State::new(config).await.unwrap();
        state.broker().ping().await.unwrap();

        let cache = state.cache_service();
        assert_eq!(cache.namespace(), "configuration");
        cache.set_bytes("hello", b"1", NO_TTL).await.unwrap();
        assert_eq!(
            state.cache_service().get_bytes("hello").await.unwrap(),
            b"1".to_vec()
        );
    }
}
