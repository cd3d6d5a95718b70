mod elastic;
mod local;

pub use elastic::ElasticIndex;
pub use local::LocalIndex;

use crate::errors::Result;
use crate::errors::error::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub const LOCAL_DRIVER: &str = "local";
pub const ELASTIC_DRIVER: &str = "elastic";

/// Storage backend for crawled resources.
#[async_trait]
pub trait Index: Send + Sync {
    async fn index_resource(
        &self,
        url: &str,
        time: DateTime<Utc>,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()>;
}

/// The storage drivers an indexer can be started with.
pub enum IndexDriver {
    Local(LocalIndex),
    Elastic(ElasticIndex),
}

impl IndexDriver {
    pub const NAMES: [&'static str; 2] = [LOCAL_DRIVER, ELASTIC_DRIVER];

    /// Opens the driver called `name` on `dest`.
    pub async fn open(name: &str, dest: &str) -> Result<Self> {
        match name {
            LOCAL_DRIVER => Ok(IndexDriver::Local(LocalIndex::new(dest).await?)),
            ELASTIC_DRIVER => Ok(IndexDriver::Elastic(ElasticIndex::new(dest).await?)),
            other => Err(ConfigError::UnknownDriver(other.to_string()).into()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexDriver::Local(_) => LOCAL_DRIVER,
            IndexDriver::Elastic(_) => ELASTIC_DRIVER,
        }
    }
}

#[async_trait]
impl Index for IndexDriver {
    async fn index_resource(
        &self,
        url: &str,
        time: DateTime<Utc>,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        match self {
            IndexDriver::Local(index) => index.index_resource(url, time, body, headers).await,
            IndexDriver::Elastic(index) => index.index_resource(url, time, body, headers).await,
        }
    }
}

/// Resolves `name` to a storage driver configured with `dest`. An unknown
/// name is a configuration error.
pub async fn new_index(name: &str, dest: &str) -> Result<Arc<dyn Index>> {
    let driver = IndexDriver::open(name, dest).await?;
    log::info!("Using {} index driver", driver.name());
    Ok(Arc::new(driver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_driver_is_a_config_error() {
        let err = new_index("mongodb", "whatever").await.err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("mongodb"));
    }

    #[tokio::test]
    async fn local_driver_is_selected_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let driver = IndexDriver::open("local", dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(driver.name(), "local");
        assert!(IndexDriver::NAMES.contains(&driver.name()));
    }
}
