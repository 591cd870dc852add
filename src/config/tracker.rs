//! Tracker configuration: the output paths that prove a pair is complete.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};

use super::{from_value, read_json};

/// Contents of a step's tracker config file.
///
/// Every entry of `PATHS` is a glob pattern, relative to the pipeline output
/// directory, that may contain per-pair placeholders.
/// `PARTICIPANT_SESSION_DIR` names the per-pair output subdirectory used
/// for archiving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TrackerConfig {
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_session_dir: Option<String>,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: TrackerConfig = from_value(read_json(path)?, path)?;
        config.validate(&path.display().to_string())?;
        Ok(config)
    }

    /// Rejects a config with no paths to check.
    pub fn validate(&self, source: &str) -> Result<(), ValidationError> {
        if self.paths.iter().all(|p| p.trim().is_empty()) {
            return Err(ValidationError::EmptyTrackerPaths(source.to_string()));
        }
        Ok(())
    }
}
