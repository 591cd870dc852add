//! Pipeline bundle configuration.
//!
//! A bundle's `config.json` is one of a closed set of variants selected by
//! its `PIPELINE_TYPE` tag. The fields every variant shares live on
//! [`PipelineConfig`]; variant-specific fields live on [`PipelineKind`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::ContainerConfig;
use crate::error::{ConfigError, ValidationError};
use crate::template::{self, Resolution, TemplateBindings};

use super::tracker::TrackerConfig;
use super::{from_value, read_json};

/// Step name used when a step does not set `NAME`.
pub const DEFAULT_STEP_NAME: &str = "default";

fn default_step_name() -> String {
    DEFAULT_STEP_NAME.to_string()
}

/// Kind of pipeline, also the name of its bundle store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PipelineType {
    Processing,
    Bidsification,
    Extraction,
}

impl PipelineType {
    pub fn dir_name(&self) -> &'static str {
        match self {
            PipelineType::Processing => "processing",
            PipelineType::Bidsification => "bidsification",
            PipelineType::Extraction => "extraction",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A processing pipeline an extraction pipeline reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProcDependency {
    pub name: String,
    pub version: String,
    #[serde(default = "default_step_name")]
    pub step: String,
}

/// Variant-specific part of a pipeline config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "PIPELINE_TYPE", rename_all = "lowercase")]
pub enum PipelineKind {
    /// Reads BIDS data; completion is recorded in the processing status table.
    Processing,
    /// Converts reorganized source data to BIDS; completion sets `in_bids`.
    Bidsification,
    /// Reads the outputs of other processing pipelines.
    Extraction {
        #[serde(rename = "PROC_DEPENDENCIES")]
        proc_dependencies: Vec<ProcDependency>,
    },
}

impl PipelineKind {
    pub fn pipeline_type(&self) -> PipelineType {
        match self {
            PipelineKind::Processing => PipelineType::Processing,
            PipelineKind::Bidsification => PipelineType::Bidsification,
            PipelineKind::Extraction { .. } => PipelineType::Extraction,
        }
    }
}

/// Where the pipeline's container image lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ContainerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StepConfig {
    #[serde(default = "default_step_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_config_file: Option<PathBuf>,
    #[serde(default)]
    pub container_config: ContainerConfig,
}

impl StepConfig {
    /// Loads the step's descriptor relative to the bundle directory.
    pub fn load_descriptor(&self, bundle: &Path) -> Result<Value, ConfigError> {
        let file = self.descriptor_file.as_ref().ok_or_else(|| {
            ValidationError::InvalidPipelineConfig(format!("step '{}' has no DESCRIPTOR_FILE", self.name))
        })?;
        read_json(&bundle.join(file))
    }

    /// Loads the step's invocation relative to the bundle directory.
    pub fn load_invocation(&self, bundle: &Path) -> Result<Value, ConfigError> {
        let file = self.invocation_file.as_ref().ok_or_else(|| {
            ValidationError::InvalidPipelineConfig(format!("step '{}' has no INVOCATION_FILE", self.name))
        })?;
        read_json(&bundle.join(file))
    }

    /// Loads the step's tracker config, if it declares one.
    pub fn load_tracker_config(&self, bundle: &Path) -> Result<Option<TrackerConfig>, ConfigError> {
        self.tracker_config_file
            .as_ref()
            .map(|file| TrackerConfig::load(&bundle.join(file)))
            .transpose()
    }
}

/// Contents of a pipeline bundle's `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PipelineConfig {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub container_info: ContainerInfo,
    #[serde(default)]
    pub container_config: ContainerConfig,
    pub steps: Vec<StepConfig>,
    /// Variables the user must set in `PIPELINE_VARIABLES`, name → description.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(flatten)]
    pub kind: PipelineKind,
}

impl PipelineConfig {
    /// Loads and renders a bundle config.
    ///
    /// `bindings` carries the layout paths and user substitutions;
    /// `variables` carries the user's values for this pipeline's declared
    /// `VARIABLES`, every one of which must be set.
    pub fn load(
        path: &Path,
        bindings: &TemplateBindings,
        variables: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let raw = read_json(path)?;
        let declared: PipelineConfig = from_value(raw.clone(), path)?;

        let empty = BTreeMap::new();
        let values = variables.unwrap_or(&empty);
        for variable in declared.variables.keys() {
            if !values.contains_key(variable) {
                return Err(ConfigError::MissingVariable {
                    pipeline: format!("{}-{}", declared.name, declared.version),
                    variable: variable.clone(),
                });
            }
        }

        let bindings = bindings.clone().with_user(values)?;
        let rendered = template::substitute_with(&raw, &bindings, Resolution::Lenient)?;
        let config: PipelineConfig = from_value(rendered, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::InvalidPipelineConfig(format!(
                "pipeline '{}' has no STEPS",
                self.name
            )));
        }
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(ValidationError::InvalidPipelineConfig(format!(
                    "pipeline '{}' has duplicate step '{}'",
                    self.name, step.name
                )));
            }
        }
        if let PipelineKind::Extraction { proc_dependencies } = &self.kind {
            if proc_dependencies.is_empty() {
                return Err(ValidationError::InvalidPipelineConfig(format!(
                    "extraction pipeline '{}' has no PROC_DEPENDENCIES",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline_type(&self) -> PipelineType {
        self.kind.pipeline_type()
    }

    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PROCESSING: &str = r#"{
        "NAME": "fmriprep",
        "VERSION": "23.1.3",
        "PIPELINE_TYPE": "processing",
        "CONTAINER_INFO": {"FILE": "[[STUDYFORGE_DPATH_CONTAINERS]]/fmriprep.sif"},
        "CONTAINER_CONFIG": {"ARGS": ["--bind", "[[FREESURFER_LICENSE]]"]},
        "VARIABLES": {"FREESURFER_LICENSE": "Path to the FreeSurfer license file"},
        "STEPS": [{
            "DESCRIPTOR_FILE": "descriptor.json",
            "INVOCATION_FILE": "invocation.json",
            "TRACKER_CONFIG_FILE": "tracker.json"
        }]
    }"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("failed to write file");
        path
    }

    fn license_vars() -> BTreeMap<String, String> {
        BTreeMap::from([("FREESURFER_LICENSE".to_string(), "/lic.txt".to_string())])
    }

    #[test]
    fn test_load_processing_pipeline() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = write(dir.path(), "config.json", PROCESSING);
        let bindings = TemplateBindings::new().with_builtin("DPATH_CONTAINERS", "/data/containers");

        let vars = license_vars();
        let config = PipelineConfig::load(&path, &bindings, Some(&vars)).expect("valid config");
        assert_eq!(config.pipeline_type(), PipelineType::Processing);
        assert_eq!(config.steps[0].name, DEFAULT_STEP_NAME);
        assert_eq!(
            config.container_info.file,
            Some(PathBuf::from("/data/containers/fmriprep.sif"))
        );
        assert_eq!(config.container_config.args[1], "/lic.txt");
    }

    #[test]
    fn test_missing_variable_value_is_rejected() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = write(dir.path(), "config.json", PROCESSING);
        let result = PipelineConfig::load(&path, &TemplateBindings::new(), None);
        assert!(matches!(result, Err(ConfigError::MissingVariable { .. })));
    }

    #[test]
    fn test_per_pair_tokens_survive_loading() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = write(
            dir.path(),
            "config.json",
            r#"{"NAME": "p", "VERSION": "1", "PIPELINE_TYPE": "processing",
                "CONTAINER_CONFIG": {"ARGS": ["--home", "/tmp/[[STUDYFORGE_PARTICIPANT_ID]]"]},
                "STEPS": [{"NAME": "prep"}]}"#,
        );
        let config = PipelineConfig::load(&path, &TemplateBindings::new(), None).expect("valid config");
        assert_eq!(config.container_config.args[1], "/tmp/[[STUDYFORGE_PARTICIPANT_ID]]");
    }

    #[test]
    fn test_extraction_variant_carries_dependencies() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"NAME": "fs-stats", "VERSION": "0.2.0", "PIPELINE_TYPE": "extraction",
                "PROC_DEPENDENCIES": [{"NAME": "freesurfer", "VERSION": "7.3.2"}],
                "STEPS": [{}]}"#,
        )
        .expect("valid config");
        match &config.kind {
            PipelineKind::Extraction { proc_dependencies } => {
                assert_eq!(proc_dependencies[0].name, "freesurfer");
                assert_eq!(proc_dependencies[0].step, DEFAULT_STEP_NAME);
            }
            other => panic!("expected extraction, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_pipeline_type_is_rejected() {
        let result: Result<PipelineConfig, _> = serde_json::from_str(
            r#"{"NAME": "x", "VERSION": "1", "PIPELINE_TYPE": "visualization", "STEPS": [{}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicate_steps() {
        let mut config: PipelineConfig = serde_json::from_str(
            r#"{"NAME": "x", "VERSION": "1", "PIPELINE_TYPE": "bidsification", "STEPS": [{"NAME": "a"}, {"NAME": "a"}]}"#,
        )
        .expect("valid json");
        assert!(config.validate().is_err());
        config.steps.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_step_files_resolve_against_bundle() {
        let dir = tempdir().expect("failed to create temp dir");
        write(dir.path(), "descriptor.json", r#"{"name": "demo"}"#);
        write(dir.path(), "tracker.json", r#"{"PATHS": ["[[STUDYFORGE_BIDS_PARTICIPANT_ID]]/done.txt"]}"#);
        let step: StepConfig = serde_json::from_str(
            r#"{"DESCRIPTOR_FILE": "descriptor.json", "TRACKER_CONFIG_FILE": "tracker.json"}"#,
        )
        .expect("valid step");

        assert_eq!(step.load_descriptor(dir.path()).expect("descriptor")["name"], "demo");
        assert!(step.load_tracker_config(dir.path()).expect("tracker").is_some());
        assert!(step.load_invocation(dir.path()).is_err());
    }
}
