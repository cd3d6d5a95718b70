use crate::errors::error::ConfigError;
use crate::errors::{Error, Result};
use crate::queue::{CONFIG_EXCHANGE, CONFIG_KEY_HEADER, MessageHandler, RawMessage, SubscriberDef};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Key holding the hostnames crawled resources must not come from.
pub const FORBIDDEN_HOSTNAMES_KEY: &str = "forbidden-hostnames";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenHostname {
    pub hostname: String,
}

impl ForbiddenHostname {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HostnameEntry {
    Object(ForbiddenHostname),
    Plain(String),
}

impl From<HostnameEntry> for ForbiddenHostname {
    fn from(entry: HostnameEntry) -> Self {
        match entry {
            HostnameEntry::Object(h) => h,
            HostnameEntry::Plain(hostname) => ForbiddenHostname { hostname },
        }
    }
}

/// Read side of the shared configuration as seen by one process.
#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// Current forbidden hostnames; empty when the key was never set.
    async fn get_forbidden_hostnames(&self) -> Result<Vec<ForbiddenHostname>>;
    async fn set_forbidden_hostnames(&self, hostnames: Vec<ForbiddenHostname>) -> Result<()>;

    /// Reloads every value from the source of truth. Called once change
    /// events are being received, so no change is missed in between.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Client of the configuration service that keeps the values of a fixed set
/// of keys in memory and refreshes them from change events.
pub struct HttpConfigClient {
    http: reqwest::Client,
    base_uri: Url,
    keys: Vec<String>,
    values: DashMap<String, Vec<u8>>,
    // bumped by every applied change event
    updates: AtomicU64,
}

impl HttpConfigClient {
    /// Fetches every declared key once. A key the service does not know yet
    /// stays absent; any other failure aborts construction.
    pub async fn new(base_uri: &str, keys: &[&str]) -> Result<Self> {
        let base_uri = Url::parse(base_uri).map_err(|e| ConfigError::InvalidValue(Box::new(e)))?;
        if base_uri.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue(
                format!("{base_uri} cannot be a base uri").into(),
            )
            .into());
        }

        let client = Self {
            http: reqwest::Client::new(),
            base_uri,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            values: DashMap::new(),
            updates: AtomicU64::new(0),
        };
        client.fetch_all().await?;
        Ok(client)
    }

    /// `<base>/config/<key>` with `key` as a single escaped path segment.
    fn config_url(&self, key: &str) -> Url {
        let mut url = self.base_uri.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("config").push(key);
        }
        url
    }

    /// Fetches every declared key. A value received from a change event
    /// while a fetch was in flight is newer and is kept.
    async fn fetch_all(&self) -> Result<()> {
        for key in &self.keys {
            let seen = self.updates.load(Ordering::SeqCst);
            let Some(value) = self.fetch(key).await? else {
                info!("Configuration {} has no value yet", key);
                continue;
            };

            let entry = self.values.entry(key.clone());
            if self.updates.load(Ordering::SeqCst) == seen {
                entry.insert(value);
            } else {
                debug!("Configuration {} changed during fetch, keeping event value", key);
            }
        }
        Ok(())
    }

    fn is_declared(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .http
            .get(self.config_url(key))
            .send()
            .await
            .map_err(|e| ConfigError::Fetch(Box::new(e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ConfigError::Fetch(
                format!("GET {} responded {}", key, resp.status()).into(),
            )
            .into());
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ConfigError::Fetch(Box::new(e)))?;
        Ok(Some(body.to_vec()))
    }

    /// Raw bytes currently known for `key`.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            Some(bytes) => serde_json::from_slice(bytes.value())
                .map(Some)
                .map_err(Error::decode),
            None => Ok(None),
        }
    }

    /// Writes `value` through the configuration service, then keeps it as
    /// the local copy.
    pub async fn set_value<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value).map_err(|e| ConfigError::InvalidValue(Box::new(e)))?;
        let resp = self
            .http
            .put(self.config_url(key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()
            .await
            .map_err(|e| ConfigError::Fetch(Box::new(e)))?;

        if !resp.status().is_success() {
            return Err(ConfigError::Fetch(
                format!("PUT {} responded {}", key, resp.status()).into(),
            )
            .into());
        }
        self.values.insert(key.to_string(), body);
        Ok(())
    }

    /// Subscription keeping this client current. The queue is unique to the
    /// process instance so every instance receives every change, and is
    /// removed when the instance stops.
    pub fn subscriber_def(self: &Arc<Self>, process_name: &str) -> SubscriberDef {
        let queue = format!("{}ConfigQueue.{}", process_name, uuid::Uuid::new_v4());
        SubscriberDef::new(CONFIG_EXCHANGE, queue, self.clone()).transient()
    }
}

#[async_trait]
impl MessageHandler for HttpConfigClient {
    async fn handle(&self, msg: RawMessage) -> Result<()> {
        let Some(key) = msg.header(CONFIG_KEY_HEADER) else {
            debug!("Ignoring config event without {} header", CONFIG_KEY_HEADER);
            return Ok(());
        };
        if !self.is_declared(key) {
            return Ok(());
        }

        info!("Configuration {} updated", key);
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.values.insert(key.to_string(), msg.body);
        Ok(())
    }
}

#[async_trait]
impl ConfigClient for HttpConfigClient {
    async fn get_forbidden_hostnames(&self) -> Result<Vec<ForbiddenHostname>> {
        let entries: Option<Vec<HostnameEntry>> = self.get_value(FORBIDDEN_HOSTNAMES_KEY)?;
        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .map(ForbiddenHostname::from)
            .collect())
    }

    async fn set_forbidden_hostnames(&self, hostnames: Vec<ForbiddenHostname>) -> Result<()> {
        self.set_value(FORBIDDEN_HOSTNAMES_KEY, &hostnames).await
    }

    async fn refresh(&self) -> Result<()> {
        self.fetch_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_key(server: &MockServer, key: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/config/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_declared_keys_on_start() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, r#"[{"hostname":"evil.example"}]"#).await;

        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();

        assert_eq!(
            client.get_forbidden_hostnames().await.unwrap(),
            vec![ForbiddenHostname::new("evil.example")]
        );
    }

    #[tokio::test]
    async fn accepts_plain_string_hostnames() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, r#"["evil.example", {"hostname":"bad.example"}]"#).await;

        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();

        let hostnames: Vec<String> = client
            .get_forbidden_hostnames()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.hostname)
            .collect();
        assert_eq!(hostnames, vec!["evil.example", "bad.example"]);
    }

    #[tokio::test]
    async fn unknown_key_on_start_means_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();
        assert!(client.get_forbidden_hostnames().await.unwrap().is_empty());
        assert!(client.value(FORBIDDEN_HOSTNAMES_KEY).is_none());
    }

    #[tokio::test]
    async fn server_failure_on_start_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn change_events_refresh_declared_keys_only() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, "[]").await;
        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();

        client
            .handle(
                RawMessage::new(r#"[{"hostname":"evil.example"}]"#)
                    .with_header(CONFIG_KEY_HEADER, FORBIDDEN_HOSTNAMES_KEY),
            )
            .await
            .unwrap();
        client
            .handle(RawMessage::new("1").with_header(CONFIG_KEY_HEADER, "other-key"))
            .await
            .unwrap();

        assert_eq!(
            client.get_forbidden_hostnames().await.unwrap(),
            vec![ForbiddenHostname::new("evil.example")]
        );
        assert!(client.value("other-key").is_none());
    }

    #[tokio::test]
    async fn malformed_value_is_a_decode_error() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, "{oops").await;
        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();

        assert!(client.get_forbidden_hostnames().await.unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn setter_puts_through_the_service() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, "[]").await;
        Mock::given(method("PUT"))
            .and(path(format!("/config/{FORBIDDEN_HOSTNAMES_KEY}")))
            .and(body_json(serde_json::json!([{"hostname": "evil.example"}])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();
        client
            .set_forbidden_hostnames(vec![ForbiddenHostname::new("evil.example")])
            .await
            .unwrap();

        assert_eq!(
            client.get_forbidden_hostnames().await.unwrap(),
            vec![ForbiddenHostname::new("evil.example")]
        );
    }

    #[tokio::test]
    async fn subscriber_queues_are_unique_per_instance() {
        let server = MockServer::start().await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, "[]").await;
        let client = Arc::new(
            HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
                .await
                .unwrap(),
        );

        let a = client.subscriber_def("indexer");
        let b = client.subscriber_def("indexer");
        assert_eq!(a.exchange, CONFIG_EXCHANGE);
        assert!(a.queue.starts_with("indexerConfigQueue."));
        assert_ne!(a.queue, b.queue);
        assert!(a.transient);
    }

    #[tokio::test]
    async fn keys_are_sent_as_one_escaped_segment() {
        let server = MockServer::start().await;
        serve_key(&server, "crawl%20rules%3Fdraft", r#""deep""#).await;

        let client = HttpConfigClient::new(&format!("{}/", server.uri()), &["crawl rules?draft"])
            .await
            .unwrap();

        assert_eq!(
            client.get_value::<String>("crawl rules?draft").unwrap(),
            Some("deep".to_string())
        );
    }

    #[tokio::test]
    async fn refresh_picks_up_changes_missed_before_subscribing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/config/{FORBIDDEN_HOSTNAMES_KEY}")))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve_key(&server, FORBIDDEN_HOSTNAMES_KEY, r#"["evil.example"]"#).await;

        let client = HttpConfigClient::new(&server.uri(), &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .unwrap();
        assert!(client.get_forbidden_hostnames().await.unwrap().is_empty());

        ConfigClient::refresh(&client).await.unwrap();
        assert_eq!(
            client.get_forbidden_hostnames().await.unwrap(),
            vec![ForbiddenHostname::new("evil.example")]
        );
    }

    #[tokio::test]
    async fn invalid_base_uri_is_a_config_error() {
        let err = HttpConfigClient::new("not a uri", &[FORBIDDEN_HOSTNAMES_KEY])
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }
}
