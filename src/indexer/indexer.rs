use super::index::{Index, new_index};
use crate::common::process::Process;
use crate::common::state::State;
use crate::configapi::{ConfigClient, FORBIDDEN_HOSTNAMES_KEY, HttpConfigClient, check_hostname_allowed};
use crate::errors::error::PolicyError;
use crate::errors::{Error, ErrorKind, Result};
use crate::queue::{MessageHandler, NEW_RESOURCE_EXCHANGE, NewResourceEvent, RawMessage, SubscriberDef};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;


/// Queue consumed by every indexer running `driver`: instances sharing a
/// driver share the work, distinct drivers each see every resource.
pub fn queue_name(driver: &str) -> String {
    format!("{driver}IndexingQueue")
}

#[derive(Clone)]
pub struct Indexer {
    index: Arc<dyn Index>,
    index_driver: String,
    config_client: Arc<dyn ConfigClient>,
    config_subscriber: Option<SubscriberDef>,
}

impl Indexer {
    pub fn new(
        index: Arc<dyn Index>,
        index_driver: impl Into<String>,
        config_client: Arc<dyn ConfigClient>,
    ) -> Self {
        Self {
            index,
            index_driver: index_driver.into(),
            config_client,
            config_subscriber: None,
        }
    }

    /// Opens the configured driver and the configuration client. Fails
    /// before anything is subscribed when the driver is unknown.
    pub async fn initialize(state: &State) -> Result<Self> {
        let settings = state.config.indexer()?;
        let index = new_index(&settings.driver, &settings.dest).await?;

        let config_client = Arc::new(
            HttpConfigClient::new(state.config.config_api_uri()?, &[FORBIDDEN_HOSTNAMES_KEY])
                .await?,
        );
        let config_subscriber = config_client.subscriber_def(&state.config.name);

        let mut indexer = Self::new(index, settings.driver.clone(), config_client);
        indexer.config_subscriber = Some(config_subscriber);
        Ok(indexer)
    }

    pub fn index_driver(&self) -> &str {
        &self.index_driver
    }

    pub async fn handle_new_resource_event(&self, msg: RawMessage) -> Result<()> {
        let evt: NewResourceEvent = msg.read()?;

        match check_hostname_allowed(self.config_client.as_ref(), &evt.url).await {
            Ok(true) => {}
            Ok(false) => return Err(PolicyError::HostnameNotAllowed(evt.url).into()),
            Err(e) => {
                warn!("Unable to evaluate hostname policy for {}: {}", evt.url, e);
                return Err(Error::with_message(
                    ErrorKind::Policy,
                    e.to_string(),
                    Some(PolicyError::HostnameNotAllowed(evt.url)),
                ));
            }
        }

        self.index
            .index_resource(&evt.url, evt.time, &evt.body, &evt.headers)
            .await
            .map_err(|e| {
                Error::with_message(ErrorKind::Index, "error while indexing resource", Some(e))
            })?;

        info!("Successfully indexed resource {}", evt.url);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Indexer {
    async fn handle(&self, msg: RawMessage) -> Result<()> {
        self.handle_new_resource_event(msg).await
    }
}

#[async_trait]
impl Process for Indexer {
    fn name(&self) -> &str {
        "indexer"
    }

    fn subscribers(&self) -> Vec<SubscriberDef> {
        let mut defs = vec![SubscriberDef::new(
            NEW_RESOURCE_EXCHANGE,
            queue_name(&self.index_driver),
            Arc::new(self.clone()),
        )];
        defs.extend(self.config_subscriber.clone());
        defs
    }

    async fn on_subscribed(&self) -> Result<()> {
        self.config_client.refresh().await
    }
}
