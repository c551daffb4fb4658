//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound on follow-up rounds within one commit.
pub const DEFAULT_MAX_UPDATE_ROUNDS: usize = 100;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many rounds of deferred writes a single commit may process before
    /// it is aborted with [`ObservableError::UpdateLoop`](crate::ObservableError::UpdateLoop).
    pub max_update_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_rounds: DEFAULT_MAX_UPDATE_ROUNDS,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
