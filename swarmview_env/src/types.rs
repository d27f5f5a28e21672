//! Wire types shared by the simulation service API and its clients.

use serde::{Deserialize, Serialize};

/// Opaque identifier of a server-side simulation run.
///
/// Assigned by the service on creation. The client never interprets it
/// beyond equality and URL interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(String);

impl SimulationId {
    /// Wraps a service-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Motion model the service runs for every agent in a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionMode {
    /// Classic zone-based flocking
    #[default]
    Swarm,

    /// Milling with periodic (wrap-around) boundaries
    Torus,

    /// Hard-packed: flocking clamped to a hard boundary
    Hpp,

    /// Density-aware: perception scaled by local crowding
    Dpp,
}

impl MotionMode {
    /// Returns every supported mode.
    pub fn all() -> [MotionMode; 4] {
        [MotionMode::Swarm, MotionMode::Torus, MotionMode::Hpp, MotionMode::Dpp]
    }

    /// Returns the wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionMode::Swarm => "swarm",
            MotionMode::Torus => "torus",
            MotionMode::Hpp => "hpp",
            MotionMode::Dpp => "dpp",
        }
    }
}

impl std::fmt::Display for MotionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MotionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swarm" => Ok(MotionMode::Swarm),
            "torus" => Ok(MotionMode::Torus),
            "hpp" | "hard-packed" | "hard_packed" => Ok(MotionMode::Hpp),
            "dpp" | "density-aware" | "density_aware" => Ok(MotionMode::Dpp),
            _ => Err(format!(
                "Unsupported mode '{}'. Allowed: swarm, torus, hpp, dpp",
                s
            )),
        }
    }
}

/// Body of a session creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSimulationRequest {
    pub num_agents: u32,
    pub mode: MotionMode,
    pub timestep: f64,
    pub update_interval: f64,
}

/// Successful creation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSimulation {
    pub simulation_id: SimulationId,

    #[serde(default)]
    pub num_agents: Option<u32>,

    #[serde(default)]
    pub mode: Option<MotionMode>,
}

impl CreatedSimulation {
    /// Creates a response carrying only the id.
    pub fn new(simulation_id: impl Into<SimulationId>) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            num_agents: None,
            mode: None,
        }
    }
}

impl From<String> for SimulationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One entry of the service's simulation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub simulation_id: SimulationId,
    pub num_agents: u32,
    pub mode: MotionMode,
    pub tick: u64,
}

/// Point-in-time state of one simulation.
///
/// `agents` is kept as raw JSON here; `swarmview_core` decodes the records
/// into its snapshot model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub simulation_id: SimulationId,
    pub tick: u64,

    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub agents: Vec<serde_json::Value>,
}
