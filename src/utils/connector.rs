use crate::common::model::config::RedisConfig;
use crate::errors::Result;
use crate::errors::error::ConfigError;

/// Builds a Redis connection pool for `config`. No connection is opened until
/// the pool is first used.
pub fn create_redis_pool(config: &RedisConfig) -> Result<deadpool_redis::Pool> {
    let mut cfg = deadpool_redis::Config::from_url(config.url.clone());
    cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size.unwrap_or(16)));
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| ConfigError::InvalidValue(Box::new(e)).into())
}

/// Pings through `pool`, failing fast when the server is unreachable.
pub async fn check_redis_pool(pool: &deadpool_redis::Pool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| ConfigError::InvalidValue(Box::new(e)))?;
    let _pong: String = deadpool_redis::redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| ConfigError::InvalidValue(Box::new(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_is_built_lazily() {
        let pool = create_redis_pool(&RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            pool_size: Some(2),
        })
        .unwrap();
        assert_eq!(pool.status().max_size, 2);
    }

    #[test]
    fn test_invalid_url_is_a_config_error() {
        let err = create_redis_pool(&RedisConfig {
            url: "not a redis url".to_string(),
            pool_size: None,
        })
        .err()
        .unwrap();
        assert!(err.is_config());
    }
}
