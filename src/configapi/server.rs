use crate::cacheable::{Cache, NO_TTL};
use crate::errors::{Error, Result};
use crate::queue::{CONFIG_EXCHANGE, CONFIG_KEY_HEADER, MqBackend, Publisher, RawMessage};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;


#[derive(Clone)]
pub struct ConfigApiState {
    pub cache: Arc<dyn Cache>,
    pub publisher: Arc<dyn Publisher>,
    pub broker: Option<Arc<dyn MqBackend>>,
}

impl ConfigApiState {
    pub fn new(cache: Arc<dyn Cache>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            cache,
            publisher,
            broker: None,
        }
    }

    /// Lets `/health` ping the broker too.
    pub fn with_broker(mut self, broker: Arc<dyn MqBackend>) -> Self {
        self.broker = Some(broker);
        self
    }
}

/// Configures the router of the configuration service.
///
/// # Routes
/// - `GET /config/{key}`: raw stored bytes
/// - `PUT /config/{key}`: store, notify on the `config` exchange, echo
/// - `GET /health`: cache and broker ping
pub fn router(state: ConfigApiState) -> Router {
    Router::new()
        .route(
            "/config/{key}",
            get(get_configuration).put(set_configuration),
        )
        .route("/health", get(health_check))
        .with_state(state)
}

/// Failure surfaced at the HTTP boundary: a cache miss is a 404, anything
/// else a 500.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.0.to_string()).into_response()
    }
}

fn json_bytes(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Handler for GET /config/{key}
pub async fn get_configuration(
    State(state): State<ConfigApiState>,
    Path(key): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let value = state.cache.get_bytes(&key).await.map_err(|e| {
        let err = Error::from(e);
        if err.is_not_found() {
            debug!("Configuration {} not found", key);
        } else {
            error!("Error while getting configuration {}: {}", key, err);
        }
        err
    })?;
    Ok(json_bytes(value))
}

/// Handler for PUT /config/{key}
///
/// The change event is published only once the value is persisted, so a
/// consumer re-reading the key on notification sees the new bytes.
pub async fn set_configuration(
    State(state): State<ConfigApiState>,
    Path(key): Path<String>,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let value = body.to_vec();

    if let Err(e) = state.cache.set_bytes(&key, &value, NO_TTL).await {
        error!("Error while setting configuration {}: {}", key, e);
        return Err(Error::from(e).into());
    }

    let msg = RawMessage::new(value.clone()).with_header(CONFIG_KEY_HEADER, key.as_str());
    if let Err(e) = state.publisher.publish_json(CONFIG_EXCHANGE, msg).await {
        error!("Error while publishing change of {}: {}", key, e);
        return Err(e.into());
    }

    info!("Successfully set configuration {}", key);
    Ok(json_bytes(value))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: bool,
    pub broker: bool,
}

/// Handler for GET /health
pub async fn health_check(State(state): State<ConfigApiState>) -> Response {
    let cache = state.cache.ping().await.is_ok();
    let broker = match &state.broker {
        Some(broker) => broker.ping().await.is_ok(),
        None => true,
    };

    let (status, code) = if cache && broker {
        ("up", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };
    (
        code,
        Json(HealthResponse {
            status,
            cache,
            broker,
        }),
    )
        .into_response()
}

/// Seeds configuration keys that have no value yet. Existing values are left
/// untouched and no change event is published. Returns how many were written.
pub async fn apply_default_values(
    cache: &dyn Cache,
    defaults: &HashMap<String, String>,
) -> Result<usize> {
    let mut written = 0;
    for (key, value) in defaults {
        if cache
            .set_bytes_if_absent(key, value.as_bytes(), NO_TTL)
            .await?
        {
            info!("Applied default value for configuration {}", key);
            written += 1;
        }
    }
    Ok(written)
}
