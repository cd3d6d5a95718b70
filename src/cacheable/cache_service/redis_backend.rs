use super::backend::CacheBackend;
use crate::errors::CacheError;
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;
use std::time::Duration;

const RAW: u8 = 0x00;
const ZSTD: u8 = 0x01;

/// Redis-backed cache. Values above `compression_threshold` bytes are stored
/// zstd-compressed and transparently decoded on read.
///
/// Every stored value starts with one tag byte telling how the rest is
/// encoded, so any payload reads back unchanged.
pub struct RedisBackend {
    pool: Pool,
    compression_threshold: usize,
}

pub(crate) fn encode_value(value: &[u8], compression_threshold: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(value.len().min(compression_threshold) + 1);
    if value.len() <= compression_threshold {
        out.push(RAW);
        out.extend_from_slice(value);
    } else {
        out.push(ZSTD);
        zstd::stream::copy_encode(value, &mut out, 3)?;
    }
    Ok(out)
}

pub(crate) fn decode_value(stored: &[u8]) -> std::io::Result<Vec<u8>> {
    match stored.split_first() {
        Some((&RAW, rest)) => Ok(rest.to_vec()),
        Some((&ZSTD, rest)) => zstd::stream::decode_all(rest),
        Some((tag, _)) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown cache value tag {tag:#04x}"),
        )),
        None => Ok(Vec::new()),
    }
}

impl RedisBackend {
    pub fn new(pool: Pool, compression_threshold: usize) -> Self {
        Self {
            pool,
            compression_threshold,
        }
    }

    async fn encode(&self, value: &[u8]) -> Result<Vec<u8>, CacheError> {
        let threshold = self.compression_threshold;
        if value.len() <= threshold {
            return Ok(encode_value(value, threshold)?);
        }
        let val = value.to_vec();
        tokio::task::spawn_blocking(move || encode_value(&val, threshold))
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?
            .map_err(CacheError::Io)
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;
        let result: Option<Vec<u8>> = conn.get(key).await.map_err(CacheError::Redis)?;

        match result {
            Some(bytes) if bytes.first() == Some(&ZSTD) => {
                let decoded = tokio::task::spawn_blocking(move || decode_value(&bytes))
                    .await
                    .map_err(|e| CacheError::Pool(e.to_string()))??;
                Ok(Some(decoded))
            }
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let final_value = self.encode(value).await?;

        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;
        if let Some(duration) = ttl {
            let _: () = conn
                .pset_ex(key, final_value, duration.as_millis() as u64)
                .await
                .map_err(CacheError::Redis)?;
        } else {
            let _: () = conn.set(key, final_value).await.map_err(CacheError::Redis)?;
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError> {
        let final_value = self.encode(value).await?;
        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;

        let mut cmd = deadpool_redis::redis::cmd("SET");
        cmd.arg(key).arg(final_value).arg("NX");
        if let Some(d) = ttl {
            cmd.arg("PX").arg(d.as_millis() as u64);
        }
        let result: Option<String> = cmd.query_async(&mut conn).await.map_err(CacheError::Redis)?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;
        let _: () = conn.del(key).await.map_err(CacheError::Redis)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Redis)?;
        Ok(())
    }
}
