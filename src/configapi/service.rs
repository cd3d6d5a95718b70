use super::server::{ConfigApiState, apply_default_values, router};
use crate::common::process::Process;
use crate::common::state::State;
use crate::errors::Result;
use crate::queue::SubscriberDef;
use async_trait::async_trait;
use axum::Router;
use log::info;

/// The configuration service process: HTTP API only, no subscriptions.
pub struct ConfigApi {
    api_state: ConfigApiState,
}

impl ConfigApi {
    /// Seeds the configured default values, then wires the API to the
    /// process cache and event bus.
    pub async fn initialize(state: &State) -> Result<Self> {
        let cache = state.cache_service();
        let written = apply_default_values(cache.as_ref(), &state.config.default_values()).await?;
        info!("Applied {} default configuration value(s)", written);

        Ok(Self {
            api_state: ConfigApiState::new(cache, state.publisher()).with_broker(state.broker()),
        })
    }
}

#[async_trait]
impl Process for ConfigApi {
    fn name(&self) -> &str {
        "configapi"
    }

    fn subscribers(&self) -> Vec<SubscriberDef> {
        Vec::new()
    }

    fn router(&self) -> Option<Router> {
        Some(router(self.api_state.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacheable::Cache;
    use crate::common::model::config::Config;

    #[tokio::test]
    async fn initialize_seeds_defaults() {
        let config = Config::parse(
            r#"
            name = "configapi"
            [config_api.default_values]
            "forbidden-hostnames" = "[]"
            "#,
        )
        .unwrap();
        let state = State::new(config).await.unwrap();

        let process = ConfigApi::initialize(&state).await.unwrap();
        assert_eq!(process.name(), "configapi");
        assert!(process.subscribers().is_empty());
        assert!(process.router().is_some());
        assert_eq!(
            state
                .cache_service()
                .get_bytes("forbidden-hostnames")
                .await
                .unwrap(),
            b"[]".to_vec()
        );
    }
}
