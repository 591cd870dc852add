//! Dataset, pipeline, and tracker configuration.
//!
//! All configuration files are JSON with `SCREAMING_SNAKE_CASE` keys. Loading
//! applies user substitutions and layout paths to the document before it
//! is deserialized, so configs may reference `[[STUDYFORGE_DPATH_ROOT]]`
//! or user-defined `[[NAME]]` tokens. Per-pair tokens are left in place
//! and resolved later at launch time.

pub mod global;
pub mod pipeline;
pub mod tracker;

pub use global::{GlobalConfig, HpcConfig, PipelineVariables};
pub use pipeline::{
    ContainerInfo, PipelineConfig, PipelineKind, PipelineType, ProcDependency, StepConfig,
    DEFAULT_STEP_NAME,
};
pub use tracker::TrackerConfig;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ConfigError;

/// Reads a JSON document from disk.
pub fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Deserializes a JSON document, attributing failures to `path`.
pub(crate) fn from_value<T: DeserializeOwned>(value: Value, path: &Path) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
