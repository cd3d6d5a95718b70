use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exchange receiving one message per configuration write.
pub const CONFIG_EXCHANGE: &str = "config";
/// Header naming the configuration key a change event is about.
pub const CONFIG_KEY_HEADER: &str = "Config-Key";
/// Exchange receiving one message per crawled resource.
pub const NEW_RESOURCE_EXCHANGE: &str = "resource.new";

/// Broker message envelope: opaque body plus string headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl RawMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Decodes the JSON body into a typed event. Failures are decode errors,
    /// distinct from anything a handler reports afterwards.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::decode)
    }
}

/// A typed event published as JSON on a fixed exchange.
pub trait Event: Serialize {
    fn exchange(&self) -> &'static str;
}

/// A resource fetched by a crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResourceEvent {
    pub url: String,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub time: DateTime<Utc>,
}

impl Event for NewResourceEvent {
    fn exchange(&self) -> &'static str {
        NEW_RESOURCE_EXCHANGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_decodes_resource_event() {
        let msg = RawMessage::new(
            r#"{"url":"http://ok.example/page","body":"<html></html>","headers":{"Server":"nginx"},"time":"2024-03-01T10:00:00Z"}"#,
        );

        let evt: NewResourceEvent = msg.read().expect("valid event");
        assert_eq!(evt.url, "http://ok.example/page");
        assert_eq!(evt.headers.get("Server").map(String::as_str), Some("nginx"));
        assert_eq!(evt.time.timestamp(), 1709287200);
    }

    #[test]
    fn read_reports_decode_error_on_malformed_body() {
        let msg = RawMessage::new("{not json");
        let err = msg.read::<NewResourceEvent>().unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn headers_are_optional_in_resource_events() {
        let msg = RawMessage::new(
            r#"{"url":"http://ok.example/","body":"","time":"2024-03-01T10:00:00Z"}"#,
        );
        let evt: NewResourceEvent = msg.read().unwrap();
        assert!(evt.headers.is_empty());
    }
}
