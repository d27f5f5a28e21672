//! Endpoint configuration for the production environment.

use crate::error::EnvError;
use crate::types::SimulationId;
use std::time::Duration;

/// Environment variable holding the request/response base URL.
pub const API_URL_ENV: &str = "SWARMVIEW_API_URL";

/// Environment variable holding the streaming base URL.
pub const WS_URL_ENV: &str = "SWARMVIEW_WS_URL";

/// Fallback request/response base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Where the simulation service lives.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Base URL for request/response calls (default: http://localhost:8000)
    pub api_base_url: String,

    /// Base URL for the tick stream (default: derived from `api_base_url`)
    pub ws_base_url: String,

    /// Per-request timeout for request/response calls (default: 10s)
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl EndpointConfig {
    /// Creates a config whose stream URL is derived from the API URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = trim_base(api_base_url.into());
        let ws_base_url = derive_ws_url(&api_base_url);
        Self {
            api_base_url,
            ws_base_url,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Reads `SWARMVIEW_API_URL` / `SWARMVIEW_WS_URL`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = match non_empty(API_URL_ENV) {
            Some(api) => Self::new(api),
            None => Self::default(),
        };
        if let Some(ws) = non_empty(WS_URL_ENV) {
            config.ws_base_url = trim_base(ws);
        }
        config
    }

    /// Overrides the stream base URL.
    pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.ws_base_url = trim_base(url.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// URL of the simulation collection.
    pub fn simulations_url(&self) -> String {
        format!("{}/api/simulations", self.api_base_url)
    }

    /// URL of one simulation.
    pub fn simulation_url(&self, id: &SimulationId) -> String {
        format!("{}/api/simulations/{}", self.api_base_url, id)
    }

    /// URL of the health endpoint.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_base_url)
    }

    /// URL of a simulation's tick stream.
    pub fn stream_url(&self, id: &SimulationId) -> Result<String, EnvError> {
        if !(self.ws_base_url.starts_with("ws://") || self.ws_base_url.starts_with("wss://")) {
            return Err(EnvError::InvalidUrl(self.ws_base_url.clone()));
        }
        Ok(format!("{}/ws/simulations/{}", self.ws_base_url, id))
    }
}

fn trim_base(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn derive_ws_url(api_base_url: &str) -> String {
    if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", api_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.ws_base_url, "ws://localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_ws_url_derived_from_https() {
        let config = EndpointConfig::new("https://swarm.example.org/");
        assert_eq!(config.api_base_url, "https://swarm.example.org");
        assert_eq!(config.ws_base_url, "wss://swarm.example.org");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (API_URL_ENV, "http://10.0.0.5:9000"),
            (WS_URL_ENV, "ws://10.0.0.6:9001/"),
        ]
        .into_iter()
        .collect();

        let config = EndpointConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_base_url, "http://10.0.0.5:9000");
        assert_eq!(config.ws_base_url, "ws://10.0.0.6:9001");
    }

    #[test]
    fn test_from_lookup_ignores_blank_values() {
        let config = EndpointConfig::from_lookup(|_| Some("   ".to_string()));
        assert_eq!(config, EndpointConfig::default());
    }

    #[test]
    fn test_urls() {
        let config = EndpointConfig::default();
        let id = SimulationId::new("sim-42");
        assert_eq!(config.simulations_url(), "http://localhost:8000/api/simulations");
        assert_eq!(config.simulation_url(&id), "http://localhost:8000/api/simulations/sim-42");
        assert_eq!(config.stream_url(&id).unwrap(), "ws://localhost:8000/ws/simulations/sim-42");
    }

    #[test]
    fn test_stream_url_rejects_non_ws_scheme() {
        let config = EndpointConfig::default().with_ws_base_url("http://localhost:8000");
        assert!(matches!(
            config.stream_url(&SimulationId::new("x")),
            Err(EnvError::InvalidUrl(_))
        ));
    }
}
