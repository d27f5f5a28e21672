//! Production implementation of the environment traits using Tokio.
//!
//! Request/response calls go through reqwest, the tick stream through
//! tokio-tungstenite.

use crate::api::SimulationApi;
use crate::config::EndpointConfig;
use crate::error::EnvError;
use crate::stream::{FrameStream, StreamConnector};
use crate::types::{
    CreateSimulationRequest, CreatedSimulation, SimulationId, SimulationSnapshot,
    SimulationSummary,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Production API client backed by reqwest.
pub struct HttpSimulationApi {
    config: EndpointConfig,
    client: reqwest::Client,
}

impl HttpSimulationApi {
    /// Creates a client for the given endpoints.
    pub fn new(config: EndpointConfig) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EnvError::network(format!("HTTP client init failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Creates an Arc-wrapped client for sharing across tasks.
    pub fn shared(config: EndpointConfig) -> Result<Arc<Self>, EnvError> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

#[async_trait]
impl SimulationApi for HttpSimulationApi {
    async fn create(&self, request: &CreateSimulationRequest) -> Result<CreatedSimulation, EnvError> {
        let response = self
            .client
            .post(self.config.simulations_url())
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn delete(&self, id: &SimulationId) -> Result<(), EnvError> {
        let response = self
            .client
            .delete(self.config.simulation_url(id))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<SimulationSummary>, EnvError> {
        let response = self
            .client
            .get(self.config.simulations_url())
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn fetch(&self, id: &SimulationId) -> Result<SimulationSnapshot, EnvError> {
        let response = self
            .client
            .get(self.config.simulation_url(id))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn health(&self) -> Result<(), EnvError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

fn transport_error(err: reqwest::Error) -> EnvError {
    EnvError::network(err.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EnvError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EnvError::http(status.as_u16(), error_message(status.as_u16(), &body)))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, EnvError> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| EnvError::Serialization(e.to_string()))
}

/// Extracts the human-readable message from an error body.
///
/// The service reports failures as `{"detail": "..."}`, or a list of
/// `{"msg": "..."}` entries for validation failures. Anything else is
/// returned as the raw body.
pub(crate) fn error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(serde_json::Value::Array(items)) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if !messages.is_empty() {
                    return messages.join("; ");
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("Request failed with status {}", status)
    } else {
        trimmed.to_string()
    }
}

/// Production stream connector backed by tokio-tungstenite.
pub struct WsStreamConnector {
    config: EndpointConfig,
}

impl WsStreamConnector {
    /// Creates a connector for the given endpoints.
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    /// Creates an Arc-wrapped connector for sharing across tasks.
    pub fn shared(config: EndpointConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }
}

#[async_trait]
impl StreamConnector for WsStreamConnector {
    async fn connect(&self, id: &SimulationId) -> Result<Box<dyn FrameStream>, EnvError> {
        let url = self.config.stream_url(id)?;
        let (inner, _) = connect_async(url.as_str())
            .await
            .map_err(|e| EnvError::stream(format!("connect to {url} failed: {e}")))?;

        info!("Stream connected to {}", url);
        Ok(Box::new(WsFrameStream { inner }))
    }
}

/// A connected WebSocket tick stream.
pub struct WsFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<String, EnvError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!("Stream closed by peer: {:?}", frame);
                    return None;
                }
                Ok(_) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(EnvError::stream(e.to_string()))),
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), EnvError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(""),
        };
        match self.inner.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(EnvError::stream(e.to_string())),
        }
    }
}
