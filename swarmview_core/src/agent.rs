//! Agent snapshot model - one agent at one tick.

use nalgebra::Vector3;
use serde::{Deserialize, Deserializer, Serialize};

/// Stable identifier of an agent within one session.
///
/// The service may send integer indices or strings; both normalize to the
/// same textual form so `7` and `"7"` name the same agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates an id from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for AgentId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Unsigned(u64),
            Signed(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Unsigned(n) => AgentId(n.to_string()),
            RawId::Signed(n) => AgentId(n.to_string()),
            RawId::Text(s) => AgentId(s),
        })
    }
}

/// State of one agent as of one tick.
///
/// Immutable per tick: the next tick carries a new value for the same id
/// rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Agent identity (unique within the session)
    pub id: AgentId,

    /// Position [x, y, z] in world units
    pub position: [f64; 3],

    /// Velocity [vx, vy, vz], absent when the service does not report it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f64; 3]>,
}

impl AgentSnapshot {
    /// Creates a snapshot without velocity.
    pub fn new(id: impl Into<AgentId>, position: [f64; 3]) -> Self {
        Self {
            id: id.into(),
            position,
            velocity: None,
        }
    }

    /// Attaches a velocity.
    pub fn with_velocity(mut self, velocity: [f64; 3]) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Returns the position as a vector.
    pub fn position_vec(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    /// Returns the velocity as a vector, if present.
    pub fn velocity_vec(&self) -> Option<Vector3<f64>> {
        self.velocity.map(Vector3::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_and_string_ids_normalize() {
        let a: AgentSnapshot = serde_json::from_str(r#"{"id":7,"position":[0,0,0]}"#).unwrap();
        let b: AgentSnapshot = serde_json::from_str(r#"{"id":"7","position":[0,0,0]}"#).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "7");
    }

    #[test]
    fn test_velocity_optional_and_nullable() {
        let absent: AgentSnapshot =
            serde_json::from_str(r#"{"id":"a1","position":[1,2,3]}"#).unwrap();
        assert!(absent.velocity.is_none());

        let null: AgentSnapshot =
            serde_json::from_str(r#"{"id":"a1","position":[1,2,3],"velocity":null}"#).unwrap();
        assert!(null.velocity.is_none());

        let present: AgentSnapshot =
            serde_json::from_str(r#"{"id":"a1","position":[1,2,3],"velocity":[0.5,0,0]}"#).unwrap();
        assert_eq!(present.velocity_vec(), Some(Vector3::new(0.5, 0.0, 0.0)));
        assert_eq!(present.position_vec(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_wrong_arity_position_rejected() {
        let result = serde_json::from_str::<AgentSnapshot>(r#"{"id":"a1","position":[1,2]}"#);
        assert!(result.is_err());
    }
}
