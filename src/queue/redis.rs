use super::{
    AckAction, DeadLetter, HEADER_NACK_REASON, Message, MqBackend, NackDisposition, NackPolicy,
    decide_nack, parse_attempt, retry_headers,
};
use crate::errors::Result;
use crate::errors::error::QueueError;
use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use deadpool_redis::redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use deadpool_redis::redis::{self, AsyncCommands, RedisResult};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

const CLAIM_IDLE_MS: u64 = 60_000;
const CLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Redis Streams broker.
///
/// An exchange is the stream `<ns>:<exchange>` and a queue is a consumer
/// group on it, so consumers of one group compete while every group sees
/// every entry. Redeliveries go to the queue's own stream `<ns>:queue:<queue>`
/// (read by the same group) and exhausted messages to `<ns>:dlq:<queue>`.
///
/// Entries left pending by a consumer that died are claimed once they have
/// been idle for a minute, so every entry is eventually settled.
pub struct RedisQueue {
    pool: Pool,
    namespace: String,
    consumer_name: String,
    policy: NackPolicy,
    block_ms: usize,
    minid_time: u64,
    listeners: DashMap<String, Vec<AbortHandle>>,
}

struct InFlight {
    stream: String,
    entry_id: String,
    payload: Arc<Vec<u8>>,
    headers: Arc<HashMap<String, String>>,
}

#[derive(Clone)]
struct GroupSettler {
    pool: Pool,
    group: String,
    queue_key: String,
    dlq_key: String,
    policy: NackPolicy,
}

fn encode_headers(headers: &HashMap<String, String>) -> Result<String> {
    serde_json::to_string(headers).map_err(|e| QueueError::SerializationFailed(Box::new(e)).into())
}

fn decode_entry(entry: &StreamId) -> Option<(Vec<u8>, HashMap<String, String>)> {
    let payload: Vec<u8> = entry.get("payload")?;
    let headers = entry
        .get::<String>("headers")
        .and_then(|h| serde_json::from_str(&h).ok())
        .unwrap_or_default();
    Some((payload, headers))
}

async fn xadd(
    conn: &mut deadpool_redis::Connection,
    key: &str,
    payload: &[u8],
    headers: &str,
) -> RedisResult<String> {
    redis::cmd("XADD")
        .arg(key)
        .arg("*")
        .arg("payload")
        .arg(payload)
        .arg("headers")
        .arg(headers)
        .query_async(conn)
        .await
}

/// Lowest entry id kept when streams retain `hours` of history.
pub(crate) fn retention_min_id(now_ms: u128, hours: u64) -> u128 {
    now_ms.saturating_sub(hours as u128 * 60 * 60 * 1000)
}

async fn ensure_group(conn: &mut deadpool_redis::Connection, stream: &str, group: &str) {
    let created: RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "$").await;
    match created {
        Ok(_) => info!("Created consumer group {} for stream {}", group, stream),
        Err(e) => {
            if e.code() != Some("BUSYGROUP") {
                error!("Failed to create consumer group {} on {}: {}", group, stream, e);
            }
        }
    }
}

impl RedisQueue {
    pub fn new(pool: Pool, namespace: &str, policy: NackPolicy) -> Self {
        Self {
            pool,
            namespace: namespace.to_string(),
            consumer_name: uuid::Uuid::new_v4().to_string(),
            policy,
            block_ms: 5000,
            minid_time: 0,
            listeners: DashMap::new(),
        }
    }

    /// Keeps `hours` of history in every stream of the namespace when
    /// [`MqBackend::clean_storage`] runs. Zero keeps everything.
    pub fn with_retention(mut self, hours: u64) -> Self {
        self.minid_time = hours;
        self
    }

    fn exchange_key(&self, exchange: &str) -> String {
        format!("{}:{}", self.namespace, exchange)
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.namespace, queue)
    }

    fn dlq_key(&self, queue: &str) -> String {
        format!("{}:dlq:{}", self.namespace, queue)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed.into())
    }
}

/// Read side of one subscription: hands stream entries to the consumer and
/// remembers them until they are settled.
struct StreamListener {
    group: String,
    consumer_name: String,
    in_flight: Arc<DashMap<String, InFlight>>,
    ack_tx: mpsc::Sender<(String, AckAction)>,
    sender: mpsc::Sender<Message>,
}

impl StreamListener {
    /// Returns false once the consumer side is gone.
    async fn dispatch(
        &self,
        conn: &mut deadpool_redis::Connection,
        stream: &str,
        entry: &StreamId,
    ) -> bool {
        let Some((payload, headers)) = decode_entry(entry) else {
            warn!("Dropping malformed entry {} on {}", entry.id, stream);
            let _: RedisResult<i64> = conn.xack(stream, &self.group, &[&entry.id]).await;
            return true;
        };

        let id = uuid::Uuid::new_v4().to_string();
        let payload = Arc::new(payload);
        let headers = Arc::new(headers);
        self.in_flight.insert(
            id.clone(),
            InFlight {
                stream: stream.to_string(),
                entry_id: entry.id.clone(),
                payload: payload.clone(),
                headers: headers.clone(),
            },
        );

        let msg = Message::new(id.clone(), payload, headers, self.ack_tx.clone());
        if self.sender.send(msg).await.is_err() {
            self.in_flight.remove(&id);
            return false;
        }
        true
    }

    /// Takes over entries another consumer of the group read but never
    /// settled.
    async fn claim_stale(&self, conn: &mut deadpool_redis::Connection, stream: &str) -> bool {
        let mut start = "0-0".to_string();
        loop {
            let reply: RedisResult<StreamAutoClaimReply> = conn
                .xautoclaim_options(
                    stream,
                    &self.group,
                    &self.consumer_name,
                    CLAIM_IDLE_MS,
                    &start,
                    StreamAutoClaimOptions::default().count(100),
                )
                .await;
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Failed to claim stale entries on {}: {}", stream, e);
                    return true;
                }
            };

            if !reply.claimed.is_empty() {
                info!(
                    "Claimed {} stale entries on {} for group {}",
                    reply.claimed.len(),
                    stream,
                    self.group
                );
            }
            for entry in &reply.claimed {
                if self.in_flight.iter().any(|f| f.entry_id == entry.id) {
                    continue;
                }
                if !self.dispatch(conn, stream, entry).await {
                    return false;
                }
            }

            if reply.next_stream_id == "0-0" || reply.next_stream_id.is_empty() {
                return true;
            }
            start = reply.next_stream_id;
        }
    }
}

impl GroupSettler {
    async fn settle(&self, entry: InFlight, action: AckAction) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        if let AckAction::Nack(reason) = action {
            match decide_nack(self.policy, parse_attempt(&entry.headers)) {
                NackDisposition::Retry { next_attempt } => {
                    if self.policy.backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.policy.backoff_ms)).await;
                    }
                    let headers = encode_headers(&retry_headers(&entry.headers, next_attempt, &reason))?;
                    xadd(&mut conn, &self.queue_key, &entry.payload, &headers)
                        .await
                        .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
                }
                NackDisposition::Dlq => {
                    warn!("Message {} moved to {}: {}", entry.entry_id, self.dlq_key, reason);
                    let mut headers = entry.headers.as_ref().clone();
                    headers.insert(HEADER_NACK_REASON.to_string(), reason);
                    xadd(&mut conn, &self.dlq_key, &entry.payload, &encode_headers(&headers)?)
                        .await
                        .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
                }
            }
        }

        let _: i64 = conn
            .xack(&entry.stream, &self.group, &[&entry.entry_id])
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        Ok(())
    }
}

#[async_trait]
impl MqBackend for RedisQueue {
    async fn publish_with_headers(
        &self,
        exchange: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let headers = encode_headers(headers)?;
        xadd(&mut conn, &self.exchange_key(exchange), payload, &headers)
            .await
            .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        sender: mpsc::Sender<Message>,
    ) -> Result<()> {
        let exchange_key = self.exchange_key(exchange);
        let queue_key = self.queue_key(queue);
        let group = queue.to_string();

        let mut conn = self.connection().await?;
        ensure_group(&mut conn, &exchange_key, &group).await;
        ensure_group(&mut conn, &queue_key, &group).await;

        let in_flight: Arc<DashMap<String, InFlight>> = Arc::new(DashMap::new());
        let (ack_tx, mut ack_rx) = mpsc::channel::<(String, AckAction)>(1024);

        let settler = GroupSettler {
            pool: self.pool.clone(),
            group: group.clone(),
            queue_key: queue_key.clone(),
            dlq_key: self.dlq_key(queue),
            policy: self.policy,
        };
        let pending = in_flight.clone();
        let settle_task = tokio::spawn(async move {
            while let Some((id, action)) = ack_rx.recv().await {
                let Some((_, entry)) = pending.remove(&id) else {
                    continue;
                };
                let settler = settler.clone();
                tokio::spawn(async move {
                    if let Err(e) = settler.settle(entry, action).await {
                        error!("Failed to settle message on {}: {}", settler.group, e);
                    }
                });
            }
        });

        let listener = StreamListener {
            group: group.clone(),
            consumer_name: self.consumer_name.clone(),
            in_flight,
            ack_tx,
            sender,
        };
        let block_ms = self.block_ms;
        let listen_task = tokio::spawn(async move {
            info!(
                "Starting Redis stream listener for {} and {} (Group: {}, Consumer: {})",
                exchange_key, queue_key, listener.group, listener.consumer_name
            );
            let keys = [exchange_key.as_str(), queue_key.as_str()];
            let mut last_claim: Option<Instant> = None;

            loop {
                if listener.sender.is_closed() {
                    info!("No active consumer for group {}, stopping listener", listener.group);
                    return;
                }

                if last_claim.is_none_or(|at| at.elapsed() >= CLAIM_INTERVAL) {
                    for key in keys {
                        if !listener.claim_stale(&mut conn, key).await {
                            return;
                        }
                    }
                    last_claim = Some(Instant::now());
                }

                let opts = StreamReadOptions::default()
                    .group(&listener.group, &listener.consumer_name)
                    .block(block_ms)
                    .count(10);

                let result: RedisResult<Option<StreamReadReply>> =
                    conn.xread_options(&keys, &[">", ">"], &opts).await;

                match result {
                    Ok(Some(reply)) => {
                        for stream_key in reply.keys {
                            for entry in &stream_key.ids {
                                if !listener.dispatch(&mut conn, &stream_key.key, entry).await {
                                    warn!(
                                        "No active consumer for group {}, stopping listener",
                                        listener.group
                                    );
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Error reading from Redis stream: {}. Retrying in 5s...", e);
                        if e.code() == Some("NOGROUP") {
                            warn!("Consumer group {} missing, attempting to recreate...", listener.group);
                            ensure_group(&mut conn, keys[0], &listener.group).await;
                            ensure_group(&mut conn, keys[1], &listener.group).await;
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        self.listeners
            .entry(group)
            .or_default()
            .extend([listen_task.abort_handle(), settle_task.abort_handle()]);
        Ok(())
    }

    async fn unsubscribe(&self, exchange: &str, queue: &str) -> Result<()> {
        if let Some((_, tasks)) = self.listeners.remove(queue) {
            for task in tasks {
                task.abort();
            }
        }

        let mut conn = self.connection().await?;
        let exchange_key = self.exchange_key(exchange);
        let destroyed: RedisResult<bool> = conn.xgroup_destroy(&exchange_key, queue).await;
        match destroyed {
            Ok(_) => info!("Destroyed consumer group {} on {}", queue, exchange_key),
            Err(e) => warn!("Failed to destroy consumer group {} on {}: {}", queue, exchange_key, e),
        }
        let _: () = conn
            .del(self.queue_key(queue))
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        Ok(())
    }

    async fn send_to_dlq(
        &self,
        queue: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
        reason: &str,
    ) -> Result<()> {
        let mut headers = headers.clone();
        headers.insert(HEADER_NACK_REASON.to_string(), reason.to_string());
        let mut conn = self.connection().await?;
        xadd(&mut conn, &self.dlq_key(queue), payload, &encode_headers(&headers)?)
            .await
            .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        Ok(())
    }

    async fn read_dlq(&self, queue: &str, count: usize) -> Result<Vec<DeadLetter>> {
        let mut conn = self.connection().await?;
        let reply: StreamRangeReply = conn
            .xrange_count(self.dlq_key(queue), "-", "+", count)
            .await
            .map_err(|e| QueueError::PopFailed(Box::new(e)))?;

        Ok(reply
            .ids
            .iter()
            .filter_map(|entry| {
                let (payload, headers) = decode_entry(entry)?;
                let reason = headers.get(HEADER_NACK_REASON).cloned().unwrap_or_default();
                Some(DeadLetter {
                    id: entry.id.clone(),
                    payload,
                    headers,
                    reason,
                })
            })
            .collect())
    }

    async fn clean_storage(&self) -> Result<()> {
        if self.minid_time == 0 {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let min_id = retention_min_id(now, self.minid_time);

        info!(
            "Starting Redis storage cleanup for namespace {}, min_id: {}",
            self.namespace, min_id
        );

        let pattern = format!("{}:*", self.namespace);
        let mut keys: Vec<String> = Vec::new();
        let mut cursor = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        for key in keys {
            let key_type: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .unwrap_or_else(|_| "none".to_string());
            if key_type != "stream" {
                continue;
            }
            let trimmed: RedisResult<i64> = redis::cmd("XTRIM")
                .arg(&key)
                .arg("MINID")
                .arg("~")
                .arg(min_id.to_string())
                .query_async(&mut conn)
                .await;
            match trimmed {
                Ok(n) => debug!("Trimmed {} entries from {}", n, key),
                Err(e) => warn!("Failed to trim stream {}: {}", key, e),
            }
        }

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        Ok(())
    }
}
