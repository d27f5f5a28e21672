//! SwarmView Environment Abstraction Layer
//!
//! This crate provides the seam between the SwarmView client core and the
//! remote simulation service, so the same session logic runs against the
//! **Production** service (reqwest + tokio-tungstenite) or a **Scripted**
//! in-process service (`swarmview_sim`).
//!
//! # Interfaces
//!
//! - `SimulationApi`: request/response calls (create, delete, list, fetch, health)
//! - `StreamConnector` / `FrameStream`: the per-simulation tick stream
//!
//! # Example
//!
//! ```ignore
//! use swarmview_env::{EndpointConfig, HttpSimulationApi, WsStreamConnector};
//!
//! let endpoints = EndpointConfig::from_env();
//! let api = HttpSimulationApi::shared(endpoints.clone())?;
//! let connector = WsStreamConnector::shared(endpoints);
//! ```

mod api;
mod config;
mod error;
mod stream;
mod tokio_impl;
mod types;

pub use api::SimulationApi;
pub use config::{EndpointConfig, API_URL_ENV, DEFAULT_API_URL, WS_URL_ENV};
pub use error::EnvError;
pub use stream::{FrameStream, StreamConnector, NORMAL_CLOSURE};
pub use tokio_impl::{HttpSimulationApi, WsFrameStream, WsStreamConnector};
pub use types::{
    CreateSimulationRequest, CreatedSimulation, MotionMode, SimulationId, SimulationSnapshot,
    SimulationSummary,
};
