//! Session lifecycle scenarios.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SV-001: Plain start, stream a number of ticks, stop
    SteadyStream,

    /// SV-002: Agents spawn and despawn between ticks
    AgentChurn,

    /// SV-003: Server ends the session with a shutdown frame
    ServerShutdown,

    /// SV-004: Connection drops mid-stream without a frame
    NetworkDrop,

    /// SV-005: Server reports an error frame
    ErrorFrame,

    /// SV-006: Stop while creation is in flight, late response arrives
    StaleCreate,

    /// SV-007: Two starts in a row with a full stop in between
    Restart,

    /// SV-008: Creation rejected by the service
    CreateFailure,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyStream,
            ScenarioId::AgentChurn,
            ScenarioId::ServerShutdown,
            ScenarioId::NetworkDrop,
            ScenarioId::ErrorFrame,
            ScenarioId::StaleCreate,
            ScenarioId::Restart,
            ScenarioId::CreateFailure,
        ]
    }

    /// Scenarios that end in a failure state on purpose.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ScenarioId::NetworkDrop
                | ScenarioId::ErrorFrame
                | ScenarioId::StaleCreate
                | ScenarioId::CreateFailure
        )
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "steady_stream",
            ScenarioId::AgentChurn => "agent_churn",
            ScenarioId::ServerShutdown => "server_shutdown",
            ScenarioId::NetworkDrop => "network_drop",
            ScenarioId::ErrorFrame => "error_frame",
            ScenarioId::StaleCreate => "stale_create",
            ScenarioId::Restart => "restart",
            ScenarioId::CreateFailure => "create_failure",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "Start, stream ticks, stop; pool tracks every tick",
            ScenarioId::AgentChurn => "Agents spawn and despawn; pool keys follow the latest set",
            ScenarioId::ServerShutdown => "Shutdown frame resets to Idle and empties the scene",
            ScenarioId::NetworkDrop => "Stream drops mid-run; session goes Idle, no delete",
            ScenarioId::ErrorFrame => "Error frame sets Error with the server message",
            ScenarioId::StaleCreate => "Late creation response after stop is ignored and reaped",
            ScenarioId::Restart => "Second start tears down the first session completely",
            ScenarioId::CreateFailure => "Rejected creation surfaces the server message verbatim",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "steady_stream" | "steady" | "sv_001" => Ok(ScenarioId::SteadyStream),
            "agent_churn" | "churn" | "sv_002" => Ok(ScenarioId::AgentChurn),
            "server_shutdown" | "shutdown" | "sv_003" => Ok(ScenarioId::ServerShutdown),
            "network_drop" | "drop" | "sv_004" => Ok(ScenarioId::NetworkDrop),
            "error_frame" | "error" | "sv_005" => Ok(ScenarioId::ErrorFrame),
            "stale_create" | "stale" | "sv_006" => Ok(ScenarioId::StaleCreate),
            "restart" | "sv_007" => Ok(ScenarioId::Restart),
            "create_failure" | "sv_008" => Ok(ScenarioId::CreateFailure),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("SV-006".parse::<ScenarioId>(), Ok(ScenarioId::StaleCreate));
        assert_eq!("churn".parse::<ScenarioId>(), Ok(ScenarioId::AgentChurn));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_fault_scenarios() {
        let faults: Vec<ScenarioId> = ScenarioId::all().into_iter().filter(|s| s.is_fault()).collect();
        assert_eq!(faults.len(), 4);
        assert!(ScenarioId::CreateFailure.is_fault());
        assert!(!ScenarioId::SteadyStream.is_fault());
        assert!(!ScenarioId::Restart.is_fault());
    }
}
