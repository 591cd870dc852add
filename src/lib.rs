//! studyforge: pipeline execution and status tracking for neuroimaging datasets.
//!
//! This library decides which participant/session pairs of a study still
//! need processing, renders Boutiques descriptors and invocations into
//! containerized commands, runs them with per-pair failure isolation, and
//! persists processing status records that gate future runs.

pub mod archive;
pub mod boutiques;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod process;
pub mod study;
pub mod tables;
pub mod template;
pub mod workflow;

// Re-export commonly used error types
pub use error::{
    BoutiquesError, ConfigError, ContainerError, FileOperationError, PairFailure, TableError, TemplateError,
    ValidationError, WorkflowError,
};
