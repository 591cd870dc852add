//! Container command building.
//!
//! Container settings come from up to four levels: dataset-global,
//! pipeline, step, and a config embedded in the pipeline descriptor.
//! [`ContainerConfig::resolve`] merges the first three (most specific
//! first, stopping at `INHERIT: false`), [`ContainerConfig::with_embedded`]
//! folds in the descriptor level, and [`ContainerCommandBuilder`] turns the
//! result plus bind paths into the command prefix handed to the launcher.
//!
//! Environment variables are returned as an overlay map on
//! [`ContainerCommand`]; the current process environment is never touched.

pub mod builder;
pub mod config;

pub use builder::{
    ensure_executable, find_executable, shell_quote, BindMode, BindPath, ContainerCommand,
    ContainerCommandBuilder, ContainerEngine,
};
pub use config::{ContainerConfig, EmbeddedContainerSettings, DEFAULT_SUBCOMMAND};
