//! Configuration types for transformation sessions and the replay tool.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-session engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the structural validator after every successful apply
    pub validate_after_apply: bool,
    /// Number of ids moved into the overflow pool when the session starts
    pub overflow_pool_size: u32,
    /// Lowest id the allocator may hand out; raised to the module's id bound
    /// if that is larger
    pub first_fresh_id: u32,
    /// Keep a serializable record of every applied transformation
    pub record_applied: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validate_after_apply: false,
            overflow_pool_size: 0,
            first_fresh_id: 1,
            record_applied: true,
        }
    }
}

/// Configuration for replaying a recorded transformation sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// JSON-encoded input module
    pub module_path: PathBuf,
    /// JSON array of transformation messages
    pub transformations_path: PathBuf,
    /// Where to write the transformed module, if anywhere
    pub output_path: Option<PathBuf>,
    /// Stop at the first transformation that is not applicable
    pub stop_on_rejection: bool,
    /// Engine configuration for the replay session
    pub session: SessionConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            module_path: PathBuf::from("module.json"),
            transformations_path: PathBuf::from("transformations.json"),
            output_path: None,
            stop_on_rejection: false,
            session: SessionConfig {
                validate_after_apply: true,
                ..SessionConfig::default()
            },
        }
    }
}

impl ReplayConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
