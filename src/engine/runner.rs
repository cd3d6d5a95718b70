use crate::common::process::Process;
use crate::common::state::State;
use crate::errors::Result;
use crate::queue::{EventBus, MqBackend};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_PORT: u16 = 8080;
const CLEAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Registers every subscription of `process` on `bus`, in declaration order.
pub async fn start_subscribers(bus: &EventBus, process: &dyn Process) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    for def in process.subscribers() {
        info!(
            "{} subscribing to {} on queue {}",
            process.name(),
            def.exchange,
            def.queue
        );
        handles.push(bus.subscribe(def).await?);
    }
    Ok(handles)
}

/// Removes the instance-owned queues of `process` from the broker.
pub async fn stop_subscribers(bus: &EventBus, process: &dyn Process) {
    for def in process.subscribers().into_iter().filter(|d| d.transient) {
        if let Err(e) = bus.unsubscribe(&def).await {
            warn!("Failed to remove queue {}: {}", def.queue, e);
        }
    }
}

/// Trims broker history once an hour.
fn spawn_storage_cleaner(backend: Arc<dyn MqBackend>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEAN_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = backend.clean_storage().await {
                warn!("Broker storage cleanup failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

/// Runs `process` until Ctrl-C: consumes its subscriptions and serves its
/// HTTP API, then shuts the server down gracefully and removes its
/// instance-owned queues.
pub async fn run(state: &State, process: &dyn Process) -> Result<()> {
    info!("Starting {} ({})", process.name(), state.config.name);
    let handles = start_subscribers(&state.event_bus, process).await?;
    process.on_subscribed().await?;
    let cleaner = spawn_storage_cleaner(state.broker());

    match process.router() {
        Some(router) => {
            let port = state.config.api.as_ref().map(|a| a.port).unwrap_or(DEFAULT_PORT);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("{} listening on {}", process.name(), addr);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => shutdown_signal().await,
    }

    cleaner.abort();
    for handle in handles {
        handle.abort();
    }
    stop_subscribers(&state.event_bus, process).await;
    info!("{} stopped", process.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{LocalQueue, MessageHandler, RawMessage, SubscriberDef};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        async fn handle(&self, _: RawMessage) -> Result<()> {
            Ok(())
        }
    }

    struct TwoQueues;

    #[async_trait]
    impl Process for TwoQueues {
        fn name(&self) -> &str {
            "test"
        }

        fn subscribers(&self) -> Vec<SubscriberDef> {
            vec![
                SubscriberDef::new("resource.new", "localIndexingQueue", Arc::new(Noop)),
                SubscriberDef::new("config", "testConfigQueue.1", Arc::new(Noop)).transient(),
            ]
        }
    }

    #[tokio::test]
    async fn test_start_subscribers_binds_every_queue() {
        let backend = Arc::new(LocalQueue::default());
        let bus = EventBus::new(backend.clone(), 8);

        let handles = start_subscribers(&bus, &TwoQueues).await.unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(backend.bound_queues("resource.new"), vec!["localIndexingQueue"]);
        assert_eq!(backend.bound_queues("config"), vec!["testConfigQueue.1"]);
        assert!(TwoQueues.router().is_none());
    }

    #[tokio::test]
    async fn test_stop_subscribers_removes_transient_queues_only() {
        let backend = Arc::new(LocalQueue::default());
        let bus = EventBus::new(backend.clone(), 8);
        let handles = start_subscribers(&bus, &TwoQueues).await.unwrap();

        for handle in handles {
            handle.abort();
        }
        stop_subscribers(&bus, &TwoQueues).await;

        assert_eq!(backend.bound_queues("resource.new"), vec!["localIndexingQueue"]);
        assert!(backend.bound_queues("config").is_empty());
    }
}
