//! Command-line interface for studyforge.
//!
//! Provides the `run` and `track` commands over a dataset's installed pipelines.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs, TrackArgs, WorkflowArgs};
