//! CLI command definitions for studyforge.
//!
//! Two commands share one set of dataset/pipeline arguments: `run` launches a
//! pipeline over every eligible participant/session pair, `track` records
//! completion from the files each pair produced.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::PipelineType;
use crate::study::{DatasetLayout, ParticipantId, SessionId};
use crate::workflow::{HpcCluster, PipelineRunner, PipelineTracker, ReturnCode, RunOptions, WorkflowOptions};

/// Run and track containerized pipelines over a neuroimaging dataset.
#[derive(Parser, Debug)]
#[command(name = "studyforge")]
#[command(about = "Run and track containerized pipelines over a neuroimaging dataset")]
#[command(version)]
#[command(
    long_about = "studyforge runs Boutiques-described pipelines for every participant/session pair that is ready and not yet processed, and tracks their completion from the outputs on disk.\n\nExample usage:\n  studyforge run --dataset /data/study --pipeline fmriprep --pipeline-version 23.1.3\n  studyforge track --dataset /data/study --pipeline fmriprep"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Do not write a log file under the dataset's logs directory.
    #[arg(long, global = true)]
    pub no_log_file: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline on every eligible participant/session pair.
    Run(RunArgs),

    /// Record pipeline completion from the outputs on disk.
    Track(TrackArgs),
}

/// Arguments shared by `run` and `track`.
#[derive(clap::Args, Debug, Clone)]
pub struct WorkflowArgs {
    /// Dataset root directory.
    #[arg(short = 'd', long, env = "STUDYFORGE_DATASET")]
    pub dataset: PathBuf,

    /// Pipeline name.
    #[arg(short = 'p', long)]
    pub pipeline: String,

    /// Pipeline version (defaults to the latest installed version).
    #[arg(long)]
    pub pipeline_version: Option<String>,

    /// Pipeline step (required when the pipeline has several steps).
    #[arg(long)]
    pub pipeline_step: Option<String>,

    /// Kind of pipeline to look up.
    #[arg(long, value_enum, default_value_t = PipelineType::Processing)]
    pub pipeline_type: PipelineType,

    /// Only process this participant.
    #[arg(long)]
    pub participant_id: Option<ParticipantId>,

    /// Only process this session.
    #[arg(long)]
    pub session_id: Option<SessionId>,

    /// Render and log everything without executing or writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Submit the work to an HPC scheduler instead of running it here.
    #[arg(long, value_enum)]
    pub hpc: Option<HpcCluster>,
}

impl WorkflowArgs {
    fn layout(&self) -> anyhow::Result<DatasetLayout> {
        DatasetLayout::new(&self.dataset)
            .with_context(|| format!("Invalid dataset root: {}", self.dataset.display()))
    }

    fn workflow_options(&self) -> WorkflowOptions {
        let mut options = WorkflowOptions::new(self.pipeline.clone())
            .with_pipeline_type(self.pipeline_type)
            .with_dry_run(self.dry_run);
        if let Some(version) = &self.pipeline_version {
            options = options.with_version(version.clone());
        }
        if let Some(step) = &self.pipeline_step {
            options = options.with_step(step.clone());
        }
        if let Some(participant_id) = &self.participant_id {
            options = options.with_participant(participant_id.clone());
        }
        if let Some(session_id) = &self.session_id {
            options = options.with_session(session_id.clone());
        }
        options
    }
}

/// Arguments for `studyforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Simulate the pipeline command instead of launching it.
    #[arg(long)]
    pub simulate: bool,

    /// Keep working directories even if every pair succeeds.
    #[arg(long)]
    pub keep_workdir: bool,

    /// Archive each pair's output directory after a successful run.
    #[arg(long)]
    pub tar: bool,

    /// Write the list of pairs to run to this file and exit.
    #[arg(long)]
    pub write_list: Option<PathBuf>,
}

/// Arguments for `studyforge track`.
#[derive(Parser, Debug)]
pub struct TrackArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

impl Cli {
    /// Subcommand name, used for log file naming.
    pub fn command_name(&self) -> &'static str {
        match self.command {
            Commands::Run(_) => "run",
            Commands::Track(_) => "track",
        }
    }

    fn workflow_args(&self) -> &WorkflowArgs {
        match &self.command {
            Commands::Run(args) => &args.workflow,
            Commands::Track(args) => &args.workflow,
        }
    }

    /// Log file for this invocation: `<root>/logs/<command>/<command>-<timestamp>.log`.
    ///
    /// `None` when file logging is disabled or in a dry run.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let args = self.workflow_args();
        if self.no_log_file || args.dry_run {
            return None;
        }
        let layout = DatasetLayout::new(&args.dataset).ok()?;
        let command = self.command_name();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Some(
            layout
                .logs()
                .join(command)
                .join(format!("{command}-{timestamp}.log")),
        )
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<ReturnCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Setup failures surface as errors; per-pair failures are reflected in the
/// returned [`ReturnCode`].
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ReturnCode> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Track(args) => track_pipeline_command(args).await,
    }
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<ReturnCode> {
    let layout = args.workflow.layout()?;
    let options = RunOptions {
        simulate: args.simulate,
        keep_workdir: args.keep_workdir,
        tar: args.tar,
        write_list: args.write_list,
        hpc: args.workflow.hpc,
    };
    let runner = PipelineRunner::new(layout, args.workflow.workflow_options(), options)
        .with_context(|| format!("Failed to set up pipeline '{}'", args.workflow.pipeline))?;
    let summary = runner.run().await?;
    info!(
        "Run finished: {} ready, {} attempted, {} succeeded",
        summary.n_ready, summary.n_total, summary.n_success
    );
    Ok(summary.return_code())
}

async fn track_pipeline_command(args: TrackArgs) -> anyhow::Result<ReturnCode> {
    let layout = args.workflow.layout()?;
    let tracker = PipelineTracker::new(layout, args.workflow.workflow_options())
        .with_context(|| format!("Failed to set up pipeline '{}'", args.workflow.pipeline))?
        .with_hpc(args.workflow.hpc);
    let summary = tracker.run().await?;
    info!(
        "Tracking finished: {} tracked, {} complete",
        summary.n_total, summary.n_success
    );
    Ok(summary.return_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let args = vec!["studyforge", "run", "--dataset", "/data/study", "--pipeline", "fmriprep"];
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.command_name(), "run");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.workflow.dataset, PathBuf::from("/data/study"));
                assert_eq!(args.workflow.pipeline_type, PipelineType::Processing);
                assert!(args.workflow.pipeline_version.is_none());
                assert!(args.workflow.hpc.is_none());
                assert!(!args.simulate && !args.keep_workdir && !args.tar);
                assert!(args.write_list.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_all_options() {
        let args = vec![
            "studyforge",
            "run",
            "--dataset",
            "/data/study",
            "--pipeline",
            "dcm2bids",
            "--pipeline-version",
            "3.1.0",
            "--pipeline-step",
            "convert",
            "--pipeline-type",
            "bidsification",
            "--participant-id",
            "sub-01",
            "--session-id",
            "BL",
            "--hpc",
            "slurm",
            "--simulate",
            "--keep-workdir",
            "--tar",
            "--write-list",
            "todo.tsv",
            "--log-level",
            "debug",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert_eq!(cli.log_level, "debug");

        match cli.command {
            Commands::Run(args) => {
                let options = args.workflow.workflow_options();
                assert_eq!(options.pipeline_type, PipelineType::Bidsification);
                assert_eq!(options.pipeline_version.as_deref(), Some("3.1.0"));
                assert_eq!(options.pipeline_step.as_deref(), Some("convert"));
                assert_eq!(options.participant_id.as_ref().map(|p| p.as_str()), Some("01"));
                assert_eq!(options.session_id.as_ref().map(|s| s.as_str()), Some("BL"));
                assert_eq!(args.workflow.hpc, Some(HpcCluster::Slurm));
                assert!(args.simulate && args.keep_workdir && args.tar);
                assert_eq!(args.write_list, Some(PathBuf::from("todo.tsv")));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_track_rejects_run_only_flags() {
        let args = vec!["studyforge", "track", "--dataset", "/data", "--pipeline", "x", "--tar"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_invalid_participant_id_rejected() {
        let args = vec![
            "studyforge",
            "track",
            "--dataset",
            "/data",
            "--pipeline",
            "x",
            "--participant-id",
            "01/../02",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_log_file_path() {
        let args = vec!["studyforge", "track", "--dataset", "/data/study", "--pipeline", "x"];
        let cli = Cli::try_parse_from(args).expect("should parse");
        let path = cli.log_file_path().expect("log file enabled");
        assert!(path.starts_with("/data/study/logs/track"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("track-") && n.ends_with(".log")));

        let args = vec!["studyforge", "track", "--dataset", "/data/study", "--pipeline", "x", "--no-log-file"];
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert!(cli.log_file_path().is_none());
    }
}
