use crate::errors::Result;
use crate::errors::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Redis Configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`
    pub url: String,
    /// Connection pool size
    pub pool_size: Option<usize>,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &"***REDACTED***")
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Logger Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggerConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Option<String>,
    /// Prefix of the daily-rolling log file
    pub file_path: Option<String>,
    /// Emit JSON records instead of text
    pub json: Option<bool>,
    /// Write to stdout (default: true)
    pub console: Option<bool>,
}

/// Message hub Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HubConfig {
    /// Prefix of every broker key (default: "crawlhub")
    pub namespace: Option<String>,
    /// Per-subscription delivery buffer (default: 1024)
    pub capacity: Option<usize>,
    /// Redeliveries before a message is dead-lettered (default: 3)
    pub max_retries: Option<u32>,
    /// Delay before a redelivery in milliseconds (default: 500)
    pub backoff_ms: Option<u64>,
    /// Hours of stream history kept by the periodic cleanup (default: 0, keep everything)
    pub minid_time: Option<u64>,
    /// Redis Streams broker; the in-memory broker is used when absent
    pub redis: Option<RedisConfig>,
}

/// Cache Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Key prefix (default: "configuration")
    pub namespace: Option<String>,
    /// Compression threshold in bytes (payloads larger than this will be compressed)
    pub compression_threshold: Option<usize>,
    /// Redis configuration for cache storage; in-memory when absent
    pub redis: Option<RedisConfig>,
}

/// API Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Api {
    /// Port number for the API server
    pub port: u16,
}

/// Configuration service endpoint and seeded values
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfigApiConfig {
    /// Base URI of the configuration service, used by clients
    pub uri: Option<String>,
    /// Values written at startup for keys that have none
    #[serde(default)]
    pub default_values: HashMap<String, String>,
}

/// Indexer Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexerConfig {
    /// Storage driver name
    pub driver: String,
    /// Destination passed to the driver
    pub dest: String,
}

/// Main Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Process instance name
    pub name: String,
    /// Logger configuration
    pub logger: Option<LoggerConfig>,
    /// Message hub configuration
    pub hub: Option<HubConfig>,
    /// Cache configuration
    pub cache: Option<CacheConfig>,
    /// API server configuration
    pub api: Option<Api>,
    /// Configuration service
    pub config_api: Option<ConfigApiConfig>,
    /// Indexer configuration
    pub indexer: Option<IndexerConfig>,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(Box::new(e)))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).map_err(|e| ConfigError::Load(Box::new(e)).into())
    }

    pub fn namespace(&self) -> &str {
        self.hub
            .as_ref()
            .and_then(|h| h.namespace.as_deref())
            .unwrap_or("crawlhub")
    }

    pub fn config_api_uri(&self) -> Result<&str> {
        self.config_api
            .as_ref()
            .and_then(|c| c.uri.as_deref())
            .ok_or_else(|| ConfigError::MissingValue("config_api.uri".to_string()).into())
    }

    pub fn indexer(&self) -> Result<&IndexerConfig> {
        self.indexer
            .as_ref()
            .ok_or_else(|| ConfigError::MissingValue("indexer".to_string()).into())
    }

    pub fn default_values(&self) -> HashMap<String, String> {
        self.config_api
            .as_ref()
            .map(|c| c.default_values.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            name = "indexer"

            [logger]
            level = "debug"
            json = true

            [hub]
            namespace = "tor"
            max_retries = 5
            minid_time = 24

            [hub.redis]
            url = "redis://:secret@localhost:6379/0"
            pool_size = 8

            [cache]
            compression_threshold = 1024

            [api]
            port = 8080

            [config_api]
            uri = "http://configapi:8080"

            [config_api.default_values]
            "forbidden-hostnames" = "[]"

            [indexer]
            driver = "local"
            dest = "/tmp/index"
        "#;

        let config = Config::parse(toml_str).unwrap();
        assert_eq!(config.name, "indexer");
        assert_eq!(config.namespace(), "tor");
        assert_eq!(config.hub.as_ref().unwrap().max_retries, Some(5));
        assert_eq!(config.hub.as_ref().unwrap().minid_time, Some(24));
        assert_eq!(config.config_api_uri().unwrap(), "http://configapi:8080");
        assert_eq!(config.default_values()["forbidden-hostnames"], "[]");
        assert_eq!(config.indexer().unwrap().driver, "local");
        assert_eq!(config.api.unwrap().port, 8080);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(r#"name = "configapi""#).unwrap();
        assert_eq!(config.namespace(), "crawlhub");
        assert!(config.default_values().is_empty());
        assert!(config.indexer().unwrap_err().is_config());
        assert!(config.config_api_uri().is_err());
    }

    #[test]
    fn test_redis_url_is_redacted() {
        let redis = RedisConfig {
            url: "redis://:secret@localhost:6379/0".to_string(),
            pool_size: None,
        };
        assert!(!format!("{redis:?}").contains("secret"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-file\"").unwrap();
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.name, "from-file");

        assert!(Config::load("/nonexistent/config.toml").unwrap_err().is_config());
    }
}
