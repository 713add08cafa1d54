use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How strictly the node enforces the sync-checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// Detect conflicts and resolve them automatically
    #[default]
    Strict,
    /// Detect and report conflicts, never resolve them
    Advisory,
    /// No conflict checks at all
    Permissive,
}

impl CheckpointMode {
    /// Whether conflicts with the sync-checkpoint are checked at all
    pub fn enforces(&self) -> bool {
        !matches!(self, CheckpointMode::Permissive)
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointMode::Strict => write!(f, "strict"),
            CheckpointMode::Advisory => write!(f, "advisory"),
            CheckpointMode::Permissive => write!(f, "permissive"),
        }
    }
}

impl FromStr for CheckpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(CheckpointMode::Strict),
            "advisory" => Ok(CheckpointMode::Advisory),
            "permissive" => Ok(CheckpointMode::Permissive),
            other => Err(format!("unknown checkpoint mode: {}", other)),
        }
    }
}
