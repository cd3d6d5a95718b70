use crate::errors::Result;
use crate::queue::SubscriberDef;
use async_trait::async_trait;
use axum::Router;

/// A long-running crawlhub process: what it consumes from the hub and what
/// it serves over HTTP.
#[async_trait]
pub trait Process: Send + Sync {
    fn name(&self) -> &str;

    /// Subscriptions to register on the event bus, in order.
    fn subscribers(&self) -> Vec<SubscriberDef>;

    /// Called once every subscription is bound, before serving.
    async fn on_subscribed(&self) -> Result<()> {
        Ok(())
    }

    /// HTTP API exposed by the process, if any.
    fn router(&self) -> Option<Router> {
        None
    }
}
