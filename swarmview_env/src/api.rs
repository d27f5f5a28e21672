//! Request/response interface to the simulation service.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{
    CreateSimulationRequest, CreatedSimulation, SimulationId, SimulationSnapshot,
    SimulationSummary,
};

/// The request/response half of the simulation service.
///
/// # Implementations
///
/// - **Production**: `HttpSimulationApi` - JSON over HTTP via reqwest
/// - **Simulation**: `swarmview_sim::ScriptedService` - in-memory, with fault injection
///
/// Only `create` and `delete` take part in the session lifecycle. The
/// remaining calls back the viewer's inspection commands.
#[async_trait]
pub trait SimulationApi: Send + Sync + 'static {
    /// Creates a simulation run and returns its id.
    ///
    /// # Returns
    /// * `Ok(CreatedSimulation)` - The service accepted the run
    /// * `Err(EnvError::Http)` - The service rejected it; `message` is the server text
    /// * `Err(EnvError::Network)` - The service could not be reached
    async fn create(&self, request: &CreateSimulationRequest) -> Result<CreatedSimulation, EnvError>;

    /// Asks the service to release a simulation's resources.
    async fn delete(&self, id: &SimulationId) -> Result<(), EnvError>;

    /// Lists the simulations the service currently holds.
    async fn list(&self) -> Result<Vec<SimulationSummary>, EnvError>;

    /// Fetches the current snapshot of one simulation.
    async fn fetch(&self, id: &SimulationId) -> Result<SimulationSnapshot, EnvError>;

    /// Checks that the service is up.
    async fn health(&self) -> Result<(), EnvError>;
}
