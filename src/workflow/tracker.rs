//! Pipeline tracker: infers completion from output files and archives.

use std::path::Path;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, info, warn, Instrument};
use walkdir::WalkDir;

use crate::archive::{list_archive_entries, tar_path};
use crate::config::TrackerConfig;
use crate::error::{PairFailure, WorkflowError};
use crate::study::{DatasetLayout, ParticipantSessionKey};
use crate::tables::{ProcessingStatus, StatusRecord, StatusTable};
use crate::template::{substitute_text, Resolution};

use super::base::{PipelineWorkflow, WorkflowOptions};
use super::submission::{HpcBatch, HpcCluster, LocalSequential, SubmissionStrategy};
use super::{PairWorker, RunSummary};

/// Records `SUCCESS` or `FAIL` for every ready pair by checking that each
/// tracker path pattern matches at least one output file.
pub struct PipelineTracker {
    workflow: PipelineWorkflow,
    hpc: Option<HpcCluster>,
}

impl PipelineTracker {
    pub fn new(layout: DatasetLayout, options: WorkflowOptions) -> Result<Self, WorkflowError> {
        Ok(Self::from_workflow(PipelineWorkflow::load(layout, options)?))
    }

    pub fn from_workflow(workflow: PipelineWorkflow) -> Self {
        Self { workflow, hpc: None }
    }

    pub fn with_hpc(mut self, cluster: Option<HpcCluster>) -> Self {
        self.hpc = cluster;
        self
    }

    pub fn workflow(&self) -> &PipelineWorkflow {
        &self.workflow
    }

    pub async fn run(self) -> Result<RunSummary, WorkflowError> {
        let strategy: Box<dyn SubmissionStrategy> = match self.hpc {
            Some(cluster) => {
                let layout = &self.workflow.layout;
                Box::new(
                    HpcBatch::new(
                        cluster,
                        self.workflow.global_config.hpc.clone(),
                        layout.hpc_templates(),
                        layout.hpc_scripts(),
                    )
                    .with_dry_run(self.workflow.dry_run()),
                )
            }
            None => Box::new(LocalSequential),
        };
        self.run_with(strategy.as_ref()).await
    }

    pub async fn run_with(self, strategy: &dyn SubmissionStrategy) -> Result<RunSummary, WorkflowError> {
        let span = self.workflow.span("track");
        self.run_inner(strategy).instrument(span).await
    }

    async fn run_inner(self, strategy: &dyn SubmissionStrategy) -> Result<RunSummary, WorkflowError> {
        let workflow = self.workflow;
        info!("Tracking {}", workflow.identity);

        let tracker_config = workflow
            .step
            .load_tracker_config(&workflow.bundle)?
            .ok_or_else(|| WorkflowError::MissingTrackerConfig {
                name: workflow.identity.name.clone(),
                step: workflow.identity.step.clone(),
            })?;

        let status_table = workflow.load_status_table()?;
        let curation_table = workflow.load_curation_table()?;

        // Every ready pair is re-checked, completed ones included.
        let worklist = workflow.ready_pairs(&curation_table, &status_table);
        info!("{} pairs to track", worklist.len());

        let output_files = list_output_files(&workflow.dpath_output());
        debug!("{} files under the output directory", output_files.len());

        let mut worker = TrackPairs {
            workflow,
            tracker_config,
            output_files,
            status_table,
        };
        let mut summary = strategy.submit(&mut worker, &worklist).await?;
        summary.n_ready = worklist.len();

        if !worker.workflow.dry_run() && !worklist.is_empty() {
            let path = worker.workflow.layout.processing_status();
            if let Some(backup) = worker.status_table.save_with_backup(&path)? {
                debug!("Saved table backup {}", backup.display());
            }
        }
        info!(
            "{} of {} pairs complete ({:?})",
            summary.n_success,
            summary.n_total,
            summary.return_code()
        );
        Ok(summary)
    }
}

struct TrackPairs {
    workflow: PipelineWorkflow,
    tracker_config: TrackerConfig,
    /// Output directory listing, relative paths with `/` separators.
    output_files: Vec<String>,
    status_table: StatusTable,
}

impl TrackPairs {
    /// Archive entries for `key` if the pair's directory has been archived,
    /// re-rooted at the output directory. The shared output listing is
    /// matched separately so it is never copied per pair.
    fn archived_files(&self, key: &ParticipantSessionKey) -> Result<Vec<String>, PairFailure> {
        let Some(pattern) = self.tracker_config.participant_session_dir.as_deref() else {
            return Ok(Vec::new());
        };

        let bindings = self.workflow.pair_bindings(key)?;
        let relative = substitute_text(pattern, &bindings, Resolution::Strict)?;
        let relative = relative_to(&relative, &self.workflow.dpath_output());
        let archive = tar_path(&self.workflow.dpath_output().join(&relative));
        if !archive.is_file() {
            return Ok(Vec::new());
        }

        // Entries start at the archived directory's name, so they are
        // re-rooted at its parent.
        let prefix = Path::new(&relative)
            .parent()
            .map(to_slash_path)
            .filter(|p| !p.is_empty());
        debug!("Reading archive {}", archive.display());
        Ok(list_archive_entries(&archive)?
            .into_iter()
            .map(|entry| match &prefix {
                Some(prefix) => format!("{prefix}/{entry}"),
                None => entry,
            })
            .collect())
    }

    fn matchers(&self, key: &ParticipantSessionKey) -> Result<Vec<(String, GlobMatcher)>, PairFailure> {
        let bindings = self.workflow.pair_bindings(key)?;
        let output = self.workflow.dpath_output();
        self.tracker_config
            .paths
            .iter()
            .map(|template| -> Result<(String, GlobMatcher), PairFailure> {
                let rendered = substitute_text(template, &bindings, Resolution::Strict)?;
                let pattern = relative_to(&rendered, &output);
                let matcher = GlobBuilder::new(&pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| PairFailure::Tracking(format!("invalid path pattern '{pattern}': {e}")))?
                    .compile_matcher();
                Ok((pattern, matcher))
            })
            .collect()
    }
}

#[async_trait]
impl PairWorker for TrackPairs {
    fn workflow(&self) -> &PipelineWorkflow {
        &self.workflow
    }

    fn command_name(&self) -> &'static str {
        "track"
    }

    fn forwarded_args(&self) -> Vec<String> {
        Vec::new()
    }

    async fn process_pair(&mut self, key: &ParticipantSessionKey) -> Result<(), PairFailure> {
        let archived = self.archived_files(key)?;
        let matchers = self.matchers(key)?;

        let missing: Vec<&str> = matchers
            .iter()
            .filter(|(_, matcher)| {
                !self
                    .output_files
                    .iter()
                    .chain(archived.iter())
                    .any(|f| matcher.is_match(f))
            })
            .map(|(pattern, _)| pattern.as_str())
            .collect();
        let status = if missing.is_empty() {
            ProcessingStatus::Success
        } else {
            debug!("No match for {:?}", missing);
            ProcessingStatus::Fail
        };
        info!("{}: {}", key, status);

        self.status_table = std::mem::take(&mut self.status_table).add_or_update_records([StatusRecord::new(
            key.clone(),
            self.workflow.identity.clone(),
            status,
        )]);

        if status == ProcessingStatus::Success {
            Ok(())
        } else {
            Err(PairFailure::Tracking(format!("{} missing output(s)", missing.len())))
        }
    }
}

/// Lists every file below `root` as a `/`-separated relative path. A
/// missing directory yields an empty listing.
fn list_output_files(root: &Path) -> Vec<String> {
    if !root.is_dir() {
        warn!("Output directory {} does not exist", root.display());
        return Vec::new();
    }
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(to_slash_path))
        .collect()
}

/// Makes a rendered path relative to `root` when it points inside it.
fn relative_to(path: &str, root: &Path) -> String {
    Path::new(path)
        .strip_prefix(root)
        .map(to_slash_path)
        .unwrap_or_else(|_| path.trim_start_matches("./").to_string())
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
