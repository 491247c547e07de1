use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Identifier assigned to a fleet member by the compute API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle state reported by the compute API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    #[serde(other)]
    Other,
}

/// A fleet member as returned by the compute API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub state: InstanceState,
}

/// Running and pending members of the fleet at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub running: Vec<InstanceId>,
    pub pending: Vec<InstanceId>,
}

impl FleetSnapshot {
    /// Members that count against the fleet cap.
    pub fn size(&self) -> u32 {
        (self.running.len() + self.pending.len()) as u32
    }
}

/// Observability name for the `ordinal`-th launched instance.
pub fn instance_name(ordinal: u32) -> String {
    format!("app-instance-{ordinal}")
}
