//! Error types for studyforge operations.
//!
//! Defines error types for every subsystem of the pipeline core:
//! - Identifier and configuration validation
//! - Template substitution
//! - Container command building
//! - Descriptor/invocation validation and execution
//! - Archive file operations
//! - Tabular status stores
//! - Configuration loading
//! - Workflow setup

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised when a value fails structural validation at construction time.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid participant ID '{0}': must be non-empty and alphanumeric after stripping the 'sub-' prefix")]
    InvalidParticipantId(String),

    #[error("Invalid session ID '{0}': must be non-empty and alphanumeric after stripping the 'ses-' prefix")]
    InvalidSessionId(String),

    #[error("Tracker config '{0}' has an empty PATHS list")]
    EmptyTrackerPaths(String),

    #[error("Invalid pipeline config: {0}")]
    InvalidPipelineConfig(String),
}

/// Errors that can occur during template substitution.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unresolved template placeholder(s): {}", .names.join(", "))]
    Unresolved { names: Vec<String> },

    #[error("Substitution key '{0}' collides with a built-in placeholder")]
    ReservedKey(String),

    #[error("Invalid substitution key '{0}': expected [[NAME]] or NAME")]
    InvalidKey(String),

    #[error("Template is not valid JSON after substitution: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors that can occur while preparing a container command.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container command '{0}' not found on PATH")]
    CommandNotFound(String),

    #[error("Container COMMAND is not set")]
    MissingCommand,

    #[error("Invalid container config embedded in descriptor: {0}")]
    InvalidEmbeddedConfig(String),

    #[error("Failed to prepare bind path '{path}': {source}")]
    BindPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while validating or executing a descriptor/invocation pair.
#[derive(Debug, Error)]
pub enum BoutiquesError {
    #[error("Descriptor is invalid: {0}")]
    DescriptorInvalid(String),

    #[error("Invocation is invalid: {0}")]
    InvocationInvalid(String),

    #[error("Pipeline execution failed with exit code {exit_code}")]
    PipelineExecution { exit_code: i32 },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during archive file operations.
#[derive(Debug, Error)]
pub enum FileOperationError {
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Path already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("tar exited with code {code:?} while archiving {}: {stderr}", .path.display())]
    TarFailed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading or saving a status table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Table '{}' does not match the expected schema: expected columns {expected:?}, found {found:?}", .path.display())]
    Schema {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Malformed row {line} in '{}': {reason}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid status value '{0}'")]
    InvalidStatus(String),

    #[error("Invalid row: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading dataset, pipeline, or tracker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Pipeline '{pipeline}' declares variable '{variable}' but no value is set in PIPELINE_VARIABLES")]
    MissingVariable { pipeline: String, variable: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Setup-level errors that abort a whole workflow invocation before any pair runs.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Pipeline '{name}' is not installed under {}", .dpath.display())]
    PipelineNotInstalled { name: String, dpath: PathBuf },

    #[error("Pipeline '{name}' version '{version}' is not installed")]
    VersionNotInstalled { name: String, version: String },

    #[error("Installed versions of '{name}' are ambiguous: {versions:?} resolve to the same version")]
    AmbiguousVersion { name: String, versions: Vec<String> },

    #[error("Pipeline '{name}' has {count} steps; specify one of {steps:?}")]
    AmbiguousStep {
        name: String,
        count: usize,
        steps: Vec<String>,
    },

    #[error("Step '{step}' not found in pipeline '{name}'")]
    StepNotFound { name: String, step: String },

    #[error("Step '{step}' of pipeline '{name}' has no tracker config")]
    MissingTrackerConfig { name: String, step: String },

    #[error("Archiving requested but the tracker config of '{name}' has no PARTICIPANT_SESSION_DIR")]
    MissingParticipantSessionDir { name: String },

    #[error("Container file not found: {}", .0.display())]
    ContainerFileMissing(PathBuf),

    #[error("HPC submission failed: {0}")]
    Submission(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("HPC template error: {0}")]
    Tera(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single participant/session pair failed.
///
/// Returned from per-pair processing and logged by the orchestrator; it
/// never aborts the remaining pairs.
#[derive(Debug, Error)]
pub enum PairFailure {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("{0}")]
    Launch(#[from] BoutiquesError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
