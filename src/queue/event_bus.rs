use super::event::{Event, RawMessage};
use super::{Message, MqBackend};
use crate::errors::Result;
use crate::errors::error::QueueError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Publishing side of the event bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `msg` on `exchange`: headers travel as broker metadata, the
    /// body as opaque bytes.
    async fn publish_json(&self, exchange: &str, msg: RawMessage) -> Result<()>;
}

/// Serializes a typed event and publishes it on its exchange.
pub async fn publish_event<E: Event + Sync>(publisher: &dyn Publisher, event: &E) -> Result<()> {
    let body = serde_json::to_vec(event)
        .map_err(|e| QueueError::SerializationFailed(Box::new(e)))?;
    publisher
        .publish_json(event.exchange(), RawMessage::new(body))
        .await
}

/// Processes one delivered message. `Ok` acknowledges it, `Err` hands it
/// back to the broker for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: RawMessage) -> Result<()>;
}

/// `(exchange, queue, handler)` triple registered by a process.
#[derive(Clone)]
pub struct SubscriberDef {
    pub exchange: String,
    pub queue: String,
    pub handler: Arc<dyn MessageHandler>,
    /// The queue belongs to this process instance only and is removed when
    /// the process stops.
    pub transient: bool,
}

impl SubscriberDef {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            handler,
            transient: false,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

impl std::fmt::Debug for SubscriberDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberDef")
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .field("transient", &self.transient)
            .finish()
    }
}

/// Publish/subscribe facade over a [`MqBackend`].
pub struct EventBus {
    backend: Arc<dyn MqBackend>,
    capacity: usize,
}

impl EventBus {
    pub fn new(backend: Arc<dyn MqBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn MqBackend> {
        &self.backend
    }

    /// Binds the subscription and spawns its consumer loop. Deliveries of one
    /// subscription are handled one at a time.
    pub async fn subscribe(&self, def: SubscriberDef) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel::<Message>(self.capacity);
        self.backend.subscribe(&def.exchange, &def.queue, tx).await?;
        info!(
            "Subscribed queue {} to exchange {}",
            def.queue, def.exchange
        );

        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                Self::dispatch(&def, msg).await;
            }
            info!("Consumer loop for queue {} ended", def.queue);
        });
        Ok(handle)
    }

    /// Removes the queue of `def` from the broker.
    pub async fn unsubscribe(&self, def: &SubscriberDef) -> Result<()> {
        self.backend.unsubscribe(&def.exchange, &def.queue).await?;
        info!(
            "Unsubscribed queue {} from exchange {}",
            def.queue, def.exchange
        );
        Ok(())
    }

    async fn dispatch(def: &SubscriberDef, msg: Message) {
        let raw = RawMessage {
            body: msg.payload.as_ref().clone(),
            headers: msg.headers.as_ref().clone(),
        };

        match def.handler.handle(raw).await {
            Ok(()) => {
                if let Err(e) = msg.ack().await {
                    error!("Failed to ack message {} on {}: {}", msg.id, def.queue, e);
                }
            }
            Err(e) => {
                if e.is_permanent() {
                    debug!("Message {} on {} rejected: {}", msg.id, def.queue, e);
                } else {
                    warn!(
                        "Message {} on {} failed (attempt {}): {}",
                        msg.id,
                        def.queue,
                        msg.attempt(),
                        e
                    );
                }
                if let Err(nack_err) = msg.nack(e.to_string()).await {
                    error!(
                        "Failed to nack message {} on {}: {}",
                        msg.id, def.queue, nack_err
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Publisher for EventBus {
    async fn publish_json(&self, exchange: &str, msg: RawMessage) -> Result<()> {
        self.backend
            .publish_with_headers(exchange, &msg.body, &msg.headers)
            .await
    }
}
