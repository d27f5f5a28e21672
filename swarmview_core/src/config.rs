//! Run configuration chosen by the user before starting a session.

use swarmview_env::{CreateSimulationRequest, MotionMode};
use thiserror::Error;

/// Largest agent count the service accepts.
pub const MAX_AGENTS: u32 = 500;

/// Invalid run configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Agent count outside 1..=MAX_AGENTS
    #[error("num_agents must be between 1 and {max}, got {got}")]
    AgentCount { got: u32, max: u32 },

    /// Timestep not a positive finite number
    #[error("timestep must be a positive number, got {0}")]
    Timestep(f64),

    /// Update interval not a positive finite number
    #[error("update_interval must be a positive number, got {0}")]
    UpdateInterval(f64),
}

/// Configuration for one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of agents to simulate (default: 20)
    pub num_agents: u32,

    /// Motion model (default: swarm)
    pub mode: MotionMode,

    /// Simulation step size in seconds (default: 0.1)
    pub timestep: f64,

    /// Seconds between streamed ticks (default: 0.1)
    pub update_interval: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_agents: 20,
            mode: MotionMode::Swarm,
            timestep: 0.1,
            update_interval: 0.1,
        }
    }
}

impl RunConfig {
    /// Creates a config with the given agent count and mode.
    pub fn new(num_agents: u32, mode: MotionMode) -> Self {
        Self {
            num_agents,
            mode,
            ..Default::default()
        }
    }

    /// Sets the timestep.
    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    /// Sets the update interval.
    pub fn with_update_interval(mut self, update_interval: f64) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// Checks the bounds the service enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 || self.num_agents > MAX_AGENTS {
            return Err(ConfigError::AgentCount {
                got: self.num_agents,
                max: MAX_AGENTS,
            });
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ConfigError::Timestep(self.timestep));
        }
        if !(self.update_interval.is_finite() && self.update_interval > 0.0) {
            return Err(ConfigError::UpdateInterval(self.update_interval));
        }
        Ok(())
    }

    /// Builds the creation request body.
    pub fn to_request(&self) -> CreateSimulationRequest {
        CreateSimulationRequest {
            num_agents: self.num_agents,
            mode: self.mode,
            timestep: self.timestep,
            update_interval: self.update_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.num_agents, 20);
        assert_eq!(config.mode, MotionMode::Swarm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_count_bounds() {
        assert!(RunConfig::new(1, MotionMode::Torus).validate().is_ok());
        assert!(RunConfig::new(500, MotionMode::Torus).validate().is_ok());
        assert_eq!(
            RunConfig::new(0, MotionMode::Torus).validate(),
            Err(ConfigError::AgentCount { got: 0, max: 500 })
        );
        assert!(RunConfig::new(501, MotionMode::Torus).validate().is_err());
    }

    #[test]
    fn test_non_positive_timings_rejected() {
        let base = RunConfig::default();
        assert!(base.clone().with_timestep(0.0).validate().is_err());
        assert!(base.clone().with_timestep(f64::NAN).validate().is_err());
        assert!(base.clone().with_update_interval(-0.1).validate().is_err());
        assert!(base.with_update_interval(f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_to_request() {
        let request = RunConfig::new(3, MotionMode::Dpp)
            .with_timestep(1.0)
            .to_request();
        assert_eq!(request.num_agents, 3);
        assert_eq!(request.mode, MotionMode::Dpp);
        assert_eq!(request.timestep, 1.0);
        assert_eq!(request.update_interval, 0.1);
    }
}
