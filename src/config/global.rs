//! Dataset-wide configuration (`global_config.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::ContainerConfig;
use crate::error::ConfigError;
use crate::study::DatasetLayout;
use crate::template::{self, Resolution, TemplateBindings};

use super::pipeline::PipelineType;
use super::{from_value, read_json};

/// Variable values keyed by pipeline name, then version, then variable name.
pub type VariablesByPipeline = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// User-provided values for pipeline-declared variables.
///
/// Keyed by the lowercase pipeline type, as in `PIPELINE_TYPE`; the
/// uppercase spelling is accepted when reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct PipelineVariables {
    #[serde(default, alias = "PROCESSING")]
    pub processing: VariablesByPipeline,
    #[serde(default, alias = "BIDSIFICATION")]
    pub bidsification: VariablesByPipeline,
    #[serde(default, alias = "EXTRACTION")]
    pub extraction: VariablesByPipeline,
}

impl PipelineVariables {
    /// Returns the variable values set for one pipeline version.
    pub fn get(&self, pipeline_type: PipelineType, name: &str, version: &str) -> Option<&BTreeMap<String, String>> {
        let by_pipeline = match pipeline_type {
            PipelineType::Processing => &self.processing,
            PipelineType::Bidsification => &self.bidsification,
            PipelineType::Extraction => &self.extraction,
        };
        by_pipeline.get(name)?.get(version)
    }
}

/// Scheduler settings used when submitting work to an HPC cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HpcConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Wall time, e.g. `12:00:00`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Memory request, e.g. `16G`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    /// Shell lines inserted before the job body (module loads, venv activation).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preamble: Vec<String>,
    /// Submit one job per pair instead of one array job.
    #[serde(default)]
    pub job_per_pair: bool,
}

/// Contents of `global_config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GlobalConfig {
    /// User placeholder values, keyed by `[[NAME]]` or `NAME`.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
    /// Dataset-level container settings, the least specific layer.
    #[serde(default)]
    pub container_config: ContainerConfig,
    #[serde(default)]
    pub pipeline_variables: PipelineVariables,
    #[serde(default)]
    pub hpc: HpcConfig,
}

impl GlobalConfig {
    /// Loads the global config of a dataset.
    ///
    /// User substitutions are validated first (a key that collides with a
    /// built-in placeholder is an error), then applied together with the
    /// layout paths to the rest of the document.
    pub fn load(path: &Path, layout: &DatasetLayout) -> Result<Self, ConfigError> {
        let raw = read_json(path)?;
        let parsed: GlobalConfig = from_value(raw.clone(), path)?;

        let bindings = TemplateBindings::new()
            .with_context(layout)
            .with_user(&parsed.substitutions)?;
        let rendered = template::substitute_with(&raw, &bindings, Resolution::Lenient)?;

        let config: GlobalConfig = from_value(rendered, path)?;
        debug!(
            "Loaded global config from {} ({} substitutions)",
            path.display(),
            config.substitutions.len()
        );
        Ok(config)
    }

    /// Bindings for the user-defined substitutions.
    pub fn user_bindings(&self) -> Result<TemplateBindings, ConfigError> {
        Ok(TemplateBindings::new().with_user(&self.substitutions)?)
    }
}
