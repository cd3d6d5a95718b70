pub mod event;
pub mod event_bus;
pub mod local;
pub mod redis;

use crate::errors::Result;
use crate::errors::error::QueueError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use event::{
    CONFIG_EXCHANGE, CONFIG_KEY_HEADER, Event, NEW_RESOURCE_EXCHANGE, NewResourceEvent, RawMessage,
};
pub use event_bus::{EventBus, MessageHandler, Publisher, SubscriberDef, publish_event};
pub use local::LocalQueue;
pub use redis::RedisQueue;


pub const HEADER_ATTEMPT: &str = "x-attempt";
pub const HEADER_NACK_REASON: &str = "x-nack-reason";

#[derive(Debug, Clone)]
/// Action to take on a delivered message: Acknowledge or Negative Acknowledge (Fail)
pub enum AckAction {
    /// Message processed successfully
    Ack,
    /// Message processing failed, with the reason
    Nack(String),
}

/// Bounded redelivery applied by a backend when a handler rejects a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDisposition {
    Retry { next_attempt: u32 },
    Dlq,
}

impl Default for NackPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

pub(crate) fn parse_attempt(headers: &HashMap<String, String>) -> u32 {
    headers
        .get(HEADER_ATTEMPT)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

pub fn decide_nack(policy: NackPolicy, attempt: u32) -> NackDisposition {
    if policy.max_retries > 0 && attempt < policy.max_retries {
        NackDisposition::Retry {
            next_attempt: attempt.saturating_add(1),
        }
    } else {
        NackDisposition::Dlq
    }
}

/// Headers for the redelivery of a rejected message.
pub(crate) fn retry_headers(
    headers: &HashMap<String, String>,
    next_attempt: u32,
    reason: &str,
) -> HashMap<String, String> {
    let mut headers = headers.clone();
    headers.insert(HEADER_ATTEMPT.to_string(), next_attempt.to_string());
    headers.insert(HEADER_NACK_REASON.to_string(), reason.to_string());
    headers
}

/// A message that exhausted its redeliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub reason: String,
}

/// Represents a message received from the queue.
/// The consumer MUST call `ack()` or `nack()` once processing is over.
#[derive(Clone)]
pub struct Message {
    pub id: String,
    pub payload: Arc<Vec<u8>>,
    pub headers: Arc<HashMap<String, String>>,
    ack_tx: mpsc::Sender<(String, AckAction)>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Message {
    pub fn new(
        id: String,
        payload: Arc<Vec<u8>>,
        headers: Arc<HashMap<String, String>>,
        ack_tx: mpsc::Sender<(String, AckAction)>,
    ) -> Self {
        Self {
            id,
            payload,
            headers,
            ack_tx,
        }
    }

    /// Number of times this message was redelivered before.
    pub fn attempt(&self) -> u32 {
        parse_attempt(&self.headers)
    }

    pub async fn ack(&self) -> Result<()> {
        self.ack_tx
            .send((self.id.clone(), AckAction::Ack))
            .await
            .map_err(|_| {
                QueueError::OperationFailed(Box::new(std::io::Error::other(
                    "Failed to send ACK signal",
                )))
                .into()
            })
    }

    pub async fn nack(&self, reason: impl Into<String>) -> Result<()> {
        self.ack_tx
            .send((self.id.clone(), AckAction::Nack(reason.into())))
            .await
            .map_err(|_| {
                QueueError::OperationFailed(Box::new(std::io::Error::other(
                    "Failed to send NACK signal",
                )))
                .into()
            })
    }
}

/// Broker transport. An exchange fans out to every queue bound to it; the
/// consumers of one queue compete for its messages.
#[async_trait]
pub trait MqBackend: Send + Sync {
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_headers(exchange, payload, &HashMap::new())
            .await
    }

    async fn publish_with_headers(
        &self,
        exchange: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<()>;

    /// Binds `queue` to `exchange` (declaring it if needed) and forwards its
    /// deliveries to `sender` until the receiver is dropped.
    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        sender: mpsc::Sender<Message>,
    ) -> Result<()>;

    /// Stops delivering `queue` and removes it from `exchange` together with
    /// the messages still waiting in it.
    async fn unsubscribe(&self, exchange: &str, queue: &str) -> Result<()>;

    /// Send a message to the Dead Letter Queue of `queue`.
    async fn send_to_dlq(
        &self,
        queue: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
        reason: &str,
    ) -> Result<()>;

    /// Read messages from the Dead Letter Queue of `queue`.
    async fn read_dlq(&self, queue: &str, count: usize) -> Result<Vec<DeadLetter>>;

    /// Drops history older than the configured retention.
    async fn clean_storage(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
