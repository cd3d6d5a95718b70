use super::{
    AckAction, DeadLetter, Message, MqBackend, NackDisposition, NackPolicy, decide_nack,
    parse_attempt, retry_headers,
};
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;

type Payload = Arc<Vec<u8>>;
type Headers = Arc<HashMap<String, String>>;

struct QueueState {
    name: String,
    consumers: Mutex<Vec<mpsc::Sender<Message>>>,
    pending: Mutex<VecDeque<(Payload, Headers)>>,
    cursor: AtomicUsize,
    in_flight: DashMap<String, (Payload, Headers)>,
    ack_tx: mpsc::Sender<(String, AckAction)>,
}

impl QueueState {
    /// Hands the message to the next live consumer, round-robin. With no
    /// consumer attached the message waits in `pending`.
    async fn deliver(&self, payload: Payload, headers: Headers) {
        loop {
            let consumer = {
                let mut consumers = self.consumers.lock().await;
                consumers.retain(|c| !c.is_closed());
                if consumers.is_empty() {
                    None
                } else {
                    let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % consumers.len();
                    Some(consumers[idx].clone())
                }
            };

            let Some(consumer) = consumer else {
                debug!("No consumer on queue {}, buffering message", self.name);
                self.pending.lock().await.push_back((payload, headers));
                return;
            };

            let id = uuid::Uuid::new_v4().to_string();
            self.in_flight
                .insert(id.clone(), (payload.clone(), headers.clone()));
            let msg = Message::new(id.clone(), payload.clone(), headers.clone(), self.ack_tx.clone());
            if consumer.send(msg).await.is_ok() {
                return;
            }
            self.in_flight.remove(&id);
        }
    }
}

/// In-memory broker for single-node runs and tests.
///
/// Every queue bound to an exchange gets its own copy of each message
/// published there; consumers attached to the same queue share its messages.
pub struct LocalQueue {
    bindings: DashMap<String, Vec<String>>,
    queues: DashMap<String, Arc<QueueState>>,
    ack_tasks: DashMap<String, AbortHandle>,
    dlq: Arc<DashMap<String, Vec<DeadLetter>>>,
    policy: NackPolicy,
}

impl LocalQueue {
    pub fn new(policy: NackPolicy) -> Self {
        Self {
            bindings: DashMap::new(),
            queues: DashMap::new(),
            ack_tasks: DashMap::new(),
            dlq: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Names of the queues currently bound to `exchange`.
    pub fn bound_queues(&self, exchange: &str) -> Vec<String> {
        self.bindings
            .get(exchange)
            .map(|q| q.value().clone())
            .unwrap_or_default()
    }

    fn declare_queue(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (ack_tx, ack_rx) = mpsc::channel(1024);
                let state = Arc::new(QueueState {
                    name: queue.to_string(),
                    consumers: Mutex::new(Vec::new()),
                    pending: Mutex::new(VecDeque::new()),
                    cursor: AtomicUsize::new(0),
                    in_flight: DashMap::new(),
                    ack_tx,
                });
                let task = tokio::spawn(run_acks(state.clone(), ack_rx, self.dlq.clone(), self.policy));
                self.ack_tasks.insert(queue.to_string(), task.abort_handle());
                info!("Declared local queue {}", queue);
                state
            })
            .clone()
    }

    fn bind(&self, exchange: &str, queue: &str) {
        let mut queues = self.bindings.entry(exchange.to_string()).or_default();
        if !queues.iter().any(|q| q == queue) {
            queues.push(queue.to_string());
        }
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new(NackPolicy::default())
    }
}

async fn run_acks(
    state: Arc<QueueState>,
    mut ack_rx: mpsc::Receiver<(String, AckAction)>,
    dlq: Arc<DashMap<String, Vec<DeadLetter>>>,
    policy: NackPolicy,
) {
    while let Some((id, action)) = ack_rx.recv().await {
        let Some((_, (payload, headers))) = state.in_flight.remove(&id) else {
            continue;
        };
        let AckAction::Nack(reason) = action else {
            continue;
        };

        match decide_nack(policy, parse_attempt(&headers)) {
            NackDisposition::Retry { next_attempt } => {
                let headers = Arc::new(retry_headers(&headers, next_attempt, &reason));
                let state = state.clone();
                tokio::spawn(async move {
                    if policy.backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
                    }
                    state.deliver(payload, headers).await;
                });
            }
            NackDisposition::Dlq => {
                warn!("Message {} moved to DLQ of {}: {}", id, state.name, reason);
                dlq.entry(state.name.clone()).or_default().push(DeadLetter {
                    id,
                    payload: payload.as_ref().clone(),
                    headers: headers.as_ref().clone(),
                    reason,
                });
            }
        }
    }
}

#[async_trait]
impl MqBackend for LocalQueue {
    async fn publish_with_headers(
        &self,
        exchange: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let queues: Vec<Arc<QueueState>> = self
            .bound_queues(exchange)
            .iter()
            .filter_map(|q| self.queues.get(q).map(|s| s.value().clone()))
            .collect();

        if queues.is_empty() {
            debug!("No queue bound to exchange {}, message dropped", exchange);
            return Ok(());
        }

        let payload = Arc::new(payload.to_vec());
        let headers = Arc::new(headers.clone());
        for queue in queues {
            queue.deliver(payload.clone(), headers.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        sender: mpsc::Sender<Message>,
    ) -> Result<()> {
        let state = self.declare_queue(queue);
        self.bind(exchange, queue);
        state.consumers.lock().await.push(sender);

        let pending: Vec<_> = state.pending.lock().await.drain(..).collect();
        for (payload, headers) in pending {
            state.deliver(payload, headers).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, exchange: &str, queue: &str) -> Result<()> {
        if let Some(mut queues) = self.bindings.get_mut(exchange) {
            queues.retain(|q| q != queue);
        }
        if let Some((_, task)) = self.ack_tasks.remove(queue) {
            task.abort();
        }
        if let Some((_, state)) = self.queues.remove(queue) {
            state.consumers.lock().await.clear();
            let dropped = state.pending.lock().await.len();
            info!("Removed local queue {} ({} pending message(s) dropped)", queue, dropped);
        }
        Ok(())
    }

    async fn send_to_dlq(
        &self,
        queue: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
        reason: &str,
    ) -> Result<()> {
        self.dlq.entry(queue.to_string()).or_default().push(DeadLetter {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.to_vec(),
            headers: headers.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn read_dlq(&self, queue: &str, count: usize) -> Result<Vec<DeadLetter>> {
        Ok(self
            .dlq
            .get(queue)
            .map(|entries| entries.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn clean_storage(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
