//! Pipeline runner: launches a pipeline step for every eligible pair.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn, Instrument};

use crate::archive::{ArchiveOutcome, Archiver};
use crate::boutiques::{self, BoshCli, BoutiquesBackend, ExecMode};
use crate::config::{PipelineType, TrackerConfig};
use crate::container::{
    ensure_executable, BindPath, ContainerCommandBuilder, ContainerConfig, EmbeddedContainerSettings,
    DEFAULT_SUBCOMMAND,
};
use crate::error::{ContainerError, PairFailure, WorkflowError};
use crate::study::{DatasetLayout, ParticipantSessionKey, PipelineIdentity};
use crate::tables::{tsv, CurationStage, CurationTable, ProcessingStatus, StatusRecord, StatusTable};
use crate::template::{substitute_text, Resolution, TemplateBindings};

use super::base::{eligible_pairs, PipelineWorkflow, WorkflowOptions};
use super::submission::{HpcBatch, HpcCluster, LocalSequential, SubmissionStrategy};
use super::{PairWorker, RunSummary};

/// Options specific to running a pipeline.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Structural dry execution instead of a real launch. Nothing is recorded.
    pub simulate: bool,
    /// Keep working directories even when every pair succeeded.
    pub keep_workdir: bool,
    /// Archive each pair's output directory after success.
    pub tar: bool,
    /// Write the worklist to this file and exit without running.
    pub write_list: Option<PathBuf>,
    /// Submit to an HPC scheduler instead of running locally.
    pub hpc: Option<HpcCluster>,
}

/// Runs a pipeline step over the eligible participant/session pairs.
pub struct PipelineRunner {
    workflow: PipelineWorkflow,
    options: RunOptions,
    backend: Arc<dyn BoutiquesBackend>,
    archiver: Archiver,
}

impl PipelineRunner {
    /// Resolves the pipeline against the dataset at `layout`.
    pub fn new(layout: DatasetLayout, workflow_options: WorkflowOptions, options: RunOptions) -> Result<Self, WorkflowError> {
        Ok(Self::from_workflow(PipelineWorkflow::load(layout, workflow_options)?, options))
    }

    pub fn from_workflow(workflow: PipelineWorkflow, options: RunOptions) -> Self {
        Self {
            workflow,
            options,
            backend: Arc::new(BoshCli::new()),
            archiver: Archiver::new(),
        }
    }

    /// Replaces the `bosh` backend.
    pub fn with_backend(mut self, backend: Arc<dyn BoutiquesBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_archiver(mut self, archiver: Archiver) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn workflow(&self) -> &PipelineWorkflow {
        &self.workflow
    }

    /// Runs the workflow with the strategy selected by the options.
    pub async fn run(self) -> Result<RunSummary, WorkflowError> {
        let strategy: Box<dyn SubmissionStrategy> = match self.options.hpc {
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

    /// Runs the workflow with an explicit submission strategy.
    pub async fn run_with(self, strategy: &dyn SubmissionStrategy) -> Result<RunSummary, WorkflowError> {
        let span = self.workflow.span("run");
        self.run_inner(strategy).instrument(span).await
    }

    async fn run_inner(self, strategy: &dyn SubmissionStrategy) -> Result<RunSummary, WorkflowError> {
        info!("Running {}", self.workflow.identity);
        let write_list = self.options.write_list.clone();
        let local = self.options.hpc.is_none();

        let mut prepared = self.setup()?;

        let ready = prepared
            .workflow
            .ready_pairs(&prepared.curation_table, &prepared.status_table);
        let completed = prepared
            .workflow
            .completed_pairs(&prepared.curation_table, &prepared.status_table);
        let worklist = eligible_pairs(&ready, &completed);
        info!(
            "{} pairs ready, {} already completed, {} to run",
            ready.len(),
            ready.len() - worklist.len(),
            worklist.len()
        );

        if let Some(path) = write_list {
            write_worklist(&path, &worklist)?;
            info!("Wrote {} pairs to {}", worklist.len(), path.display());
            return Ok(RunSummary {
                n_ready: ready.len(),
                ..Default::default()
            });
        }

        let mut summary = strategy.submit(&mut prepared, &worklist).await?;
        summary.n_ready = ready.len();

        if local {
            prepared.cleanup(&worklist, &summary)?;
        }
        info!(
            "{} of {} pairs succeeded ({:?})",
            summary.n_success,
            summary.n_total,
            summary.return_code()
        );
        Ok(summary)
    }

    /// Loads everything the per-pair loop needs and checks the container
    /// setup once, before any pair runs.
    fn setup(self) -> Result<PreparedRun, WorkflowError> {
        let workflow = self.workflow;
        let dry_run = workflow.dry_run();

        if !dry_run {
            for dpath in [workflow.dpath_output(), workflow.dpath_work(), workflow.dpath_bids_db()] {
                std::fs::create_dir_all(&dpath)?;
            }
        }

        let descriptor = workflow.step.load_descriptor(&workflow.bundle)?;
        let invocation = workflow.step.load_invocation(&workflow.bundle)?;

        let embedded = EmbeddedContainerSettings::from_descriptor(&descriptor)?;
        let mut container_config = ContainerConfig::resolve(&[
            &workflow.step.container_config,
            &workflow.pipeline_config.container_config,
            &workflow.global_config.container_config,
        ]);
        if let Some(embedded_config) = &embedded.config {
            container_config = container_config.with_embedded(embedded_config, false);
        }
        let subcommand = embedded
            .subcommand
            .unwrap_or_else(|| DEFAULT_SUBCOMMAND.to_string());

        let command = container_config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ContainerError::MissingCommand)?;
        if !dry_run {
            let resolved = ensure_executable(&command)?;
            debug!("Container command {} resolved to {}", command, resolved.display());
            if let Some(container) = workflow.fpath_container() {
                if !container.exists() {
                    return Err(WorkflowError::ContainerFileMissing(container));
                }
            }
        }

        let tracker_config = if self.options.tar {
            let config = workflow
                .step
                .load_tracker_config(&workflow.bundle)?
                .ok_or_else(|| WorkflowError::MissingTrackerConfig {
                    name: workflow.identity.name.clone(),
                    step: workflow.identity.step.clone(),
                })?;
            if config.participant_session_dir.is_none() {
                return Err(WorkflowError::MissingParticipantSessionDir {
                    name: workflow.identity.name.clone(),
                });
            }
            Some(config)
        } else {
            None
        };

        let status_table = workflow.load_status_table()?;
        let curation_table = workflow.load_curation_table()?;

        Ok(PreparedRun {
            workflow,
            options: self.options,
            backend: self.backend,
            archiver: self.archiver,
            descriptor,
            invocation,
            container_config,
            subcommand,
            tracker_config,
            status_table,
            curation_table,
        })
    }
}

/// A runner after setup, ready to process pairs.
struct PreparedRun {
    workflow: PipelineWorkflow,
    options: RunOptions,
    backend: Arc<dyn BoutiquesBackend>,
    archiver: Archiver,
    descriptor: Value,
    invocation: Value,
    container_config: ContainerConfig,
    subcommand: String,
    tracker_config: Option<TrackerConfig>,
    status_table: StatusTable,
    curation_table: CurationTable,
}

impl PreparedRun {
    /// Nothing is recorded for dry runs or simulations.
    fn records_results(&self) -> bool {
        !self.workflow.dry_run() && !self.options.simulate
    }

    fn record_success(&mut self, key: &ParticipantSessionKey) -> Result<(), PairFailure> {
        if self.workflow.pipeline_type() == PipelineType::Bidsification {
            self.curation_table = std::mem::take(&mut self.curation_table).mark(key, CurationStage::Bids, true);
            self.curation_table
                .save(&self.workflow.layout.curation_status())?;
        } else {
            let identity: PipelineIdentity = self.workflow.identity.clone();
            self.status_table = std::mem::take(&mut self.status_table).add_or_update_records([StatusRecord::new(
                key.clone(),
                identity,
                ProcessingStatus::Success,
            )]);
            self.status_table
                .save(&self.workflow.layout.processing_status())?;
        }
        Ok(())
    }

    /// Archives the pair's output directory. Failures are logged, never
    /// propagated: the output stays in place either way.
    async fn archive_pair(&self, key: &ParticipantSessionKey, bindings: &TemplateBindings) {
        let Some(pattern) = self
            .tracker_config
            .as_ref()
            .and_then(|c| c.participant_session_dir.as_deref())
        else {
            return;
        };
        let relative = match substitute_text(pattern, bindings, Resolution::Strict) {
            Ok(relative) => relative,
            Err(e) => {
                error!("Cannot archive {}: {}", key, e);
                return;
            }
        };
        let dpath = self.workflow.dpath_output().join(relative);
        match self.archiver.tar_and_remove(&dpath).await {
            Ok(ArchiveOutcome::Archived(archive)) => info!("Archived outputs to {}", archive.display()),
            Ok(ArchiveOutcome::SourceKept { .. }) => {}
            Err(e) => error!("Failed to archive {}: {}", dpath.display(), e),
        }
    }

    /// Removes working directories if every attempted pair succeeded, then
    /// persists the tables with a backup. A directory that cannot be removed
    /// is logged and skipped.
    fn cleanup(&self, worklist: &[ParticipantSessionKey], summary: &RunSummary) -> Result<(), WorkflowError> {
        if self.workflow.dry_run() {
            return Ok(());
        }

        if summary.all_succeeded() && !self.options.keep_workdir {
            let dpaths = std::iter::once(self.workflow.dpath_bids_db())
                .chain(worklist.iter().map(|key| self.workflow.dpath_pair_work(key)));
            for dpath in dpaths.filter(|d| d.exists()) {
                debug!("Removing {}", dpath.display());
                if let Err(e) = std::fs::remove_dir_all(&dpath) {
                    warn!("Failed to remove {}: {}", dpath.display(), e);
                }
            }
        } else if !summary.all_succeeded() {
            warn!(
                "Keeping working directories under {} for debugging",
                self.workflow.dpath_work().display()
            );
        }

        if self.records_results() {
            let backup = if self.workflow.pipeline_type() == PipelineType::Bidsification {
                self.curation_table
                    .save_with_backup(&self.workflow.layout.curation_status())?
            } else {
                self.status_table
                    .save_with_backup(&self.workflow.layout.processing_status())?
            };
            if let Some(backup) = backup {
                debug!("Saved table backup {}", backup.display());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PairWorker for PreparedRun {
    fn workflow(&self) -> &PipelineWorkflow {
        &self.workflow
    }

    fn command_name(&self) -> &'static str {
        "run"
    }

    fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.options.simulate {
            args.push("--simulate".to_string());
        }
        if self.options.keep_workdir {
            args.push("--keep-workdir".to_string());
        }
        if self.options.tar {
            args.push("--tar".to_string());
        }
        args
    }

    async fn process_pair(&mut self, key: &ParticipantSessionKey) -> Result<(), PairFailure> {
        let dry_run = self.workflow.dry_run();
        let pair_work = self.workflow.dpath_pair_work(key);
        if !dry_run {
            std::fs::create_dir_all(&pair_work)?;
        }

        let layout = &self.workflow.layout;
        let mut binds = if self.workflow.pipeline_type() == PipelineType::Bidsification {
            // Bidsification reads reorganized source data and writes the BIDS tree.
            vec![BindPath::readonly(layout.post_reorg()), BindPath::new(layout.bids())]
        } else {
            vec![BindPath::readonly(layout.bids())]
        };
        binds.extend([
            BindPath::new(self.workflow.dpath_output()),
            BindPath::new(pair_work),
            BindPath::new(self.workflow.dpath_bids_db()),
        ]);
        let mut builder = ContainerCommandBuilder::new(self.container_config.clone())
            .with_subcommand(self.subcommand.clone())
            .with_binds(binds)
            .without_executable_check();
        if dry_run {
            builder = builder.without_creating_binds();
        }
        let container = builder.build()?;

        let bindings = self
            .workflow
            .pair_bindings(key)?
            .with_builtin("CONTAINER_COMMAND", container.to_command_string());

        if dry_run {
            let (descriptor, invocation) = boutiques::render(&self.descriptor, &self.invocation, &bindings)?;
            info!(
                "[dry run] Container command: {}\n[dry run] Descriptor:\n{}\n[dry run] Invocation:\n{}",
                container.to_command_string(),
                serde_json::to_string_pretty(&descriptor).unwrap_or_default(),
                serde_json::to_string_pretty(&invocation).unwrap_or_default(),
            );
            return Ok(());
        }

        boutiques::launch(
            self.backend.as_ref(),
            &self.descriptor,
            &self.invocation,
            &bindings,
            ExecMode::from_simulate(self.options.simulate),
            &container.env,
        )
        .await?;

        if self.records_results() {
            self.record_success(key)?;
            if self.options.tar {
                self.archive_pair(key, &bindings).await;
            }
        }
        Ok(())
    }
}

/// Writes the worklist as a two-column TSV.
fn write_worklist(path: &std::path::Path, worklist: &[ParticipantSessionKey]) -> std::io::Result<()> {
    let rows = worklist
        .iter()
        .map(|key| vec![key.participant_id.to_string(), key.session_id.to_string()]);
    tsv::write_atomic(path, &tsv::render_tsv(&["participant_id", "session_id"], rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::CurationRecord;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Backend that fails any invocation whose participant is listed.
    #[derive(Default)]
    struct FakeBackend {
        failing: Vec<String>,
        executed: Mutex<Vec<(String, ExecMode)>>,
        command_lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BoutiquesBackend for FakeBackend {
        async fn validate_descriptor(&self, _descriptor: &Value) -> Result<(), crate::error::BoutiquesError> {
            Ok(())
        }

        async fn validate_invocation(&self, _d: &Value, _i: &Value) -> Result<(), crate::error::BoutiquesError> {
            Ok(())
        }

        async fn execute(
            &self,
            descriptor: &Value,
            invocation: &Value,
            mode: ExecMode,
            _env: &BTreeMap<String, String>,
        ) -> Result<i32, crate::error::BoutiquesError> {
            self.command_lines
                .lock()
                .expect("lock")
                .push(descriptor["command-line"].as_str().unwrap_or_default().to_string());
            let participant = invocation["participant"].as_str().unwrap_or_default().to_string();
            self.executed
                .lock()
                .expect("lock")
                .push((participant.clone(), mode));
            Ok(if self.failing.contains(&participant) { 1 } else { 0 })
        }
    }

    fn dataset(pipeline_type: PipelineType, with_tracker: bool) -> (tempfile::TempDir, DatasetLayout) {
        let dir = tempdir().expect("failed to create temp dir");
        let layout = DatasetLayout::new(dir.path()).expect("absolute root");
        std::fs::write(layout.global_config(), r#"{"CONTAINER_CONFIG": {"COMMAND": "sh"}}"#)
            .expect("failed to write global config");

        let bundle = layout.pipeline_bundle(pipeline_type, "demo", "1.0");
        std::fs::create_dir_all(&bundle).expect("failed to create bundle");
        let tracker = if with_tracker {
            r#", "TRACKER_CONFIG_FILE": "tracker.json""#
        } else {
            ""
        };
        std::fs::write(
            bundle.join("config.json"),
            format!(
                r#"{{"NAME": "demo", "VERSION": "1.0", "PIPELINE_TYPE": "{pipeline_type}",
                    "STEPS": [{{"DESCRIPTOR_FILE": "descriptor.json", "INVOCATION_FILE": "invocation.json"{tracker}}}]}}"#
            ),
        )
        .expect("failed to write config");
        std::fs::write(
            bundle.join("descriptor.json"),
            r#"{"name": "demo", "command-line": "[[STUDYFORGE_CONTAINER_COMMAND]] demo"}"#,
        )
        .expect("failed to write descriptor");
        std::fs::write(
            bundle.join("invocation.json"),
            r#"{"participant": "[[STUDYFORGE_PARTICIPANT_ID]]", "out": "[[STUDYFORGE_DPATH_PIPELINE_OUTPUT]]"}"#,
        )
        .expect("failed to write invocation");
        std::fs::write(
            bundle.join("tracker.json"),
            r#"{"PATHS": ["[[STUDYFORGE_BIDS_PARTICIPANT_ID]]/done.txt"],
                "PARTICIPANT_SESSION_DIR": "[[STUDYFORGE_BIDS_PARTICIPANT_ID]]"}"#,
        )
        .expect("failed to write tracker config");

        let curation = ["01", "02"].iter().fold(CurationTable::new(), |table, p| {
            table.add_or_update(
                CurationRecord::new(ParticipantSessionKey::parse(p, "BL").expect("valid key"))
                    .with_stage(CurationStage::PostReorg, true)
                    .with_stage(CurationStage::Bids, pipeline_type != PipelineType::Bidsification),
            )
        });
        curation
            .save(&layout.curation_status())
            .expect("failed to save curation table");
        (dir, layout)
    }

    fn runner(layout: &DatasetLayout, pipeline_type: PipelineType, options: RunOptions, backend: Arc<FakeBackend>) -> PipelineRunner {
        let workflow_options = WorkflowOptions::new("demo").with_pipeline_type(pipeline_type);
        PipelineRunner::new(layout.clone(), workflow_options, options)
            .expect("workflow loads")
            .with_backend(backend)
    }

    #[tokio::test]
    async fn test_bidsification_success_marks_curation() {
        let (_dir, layout) = dataset(PipelineType::Bidsification, false);
        let backend = Arc::new(FakeBackend {
            failing: vec!["02".to_string()],
            ..Default::default()
        });

        let summary = runner(&layout, PipelineType::Bidsification, RunOptions::default(), backend)
            .run()
            .await
            .expect("run completes");
        assert_eq!((summary.n_total, summary.n_success), (2, 1));

        let curation = CurationTable::load(&layout.curation_status()).expect("saved");
        let in_bids = curation.participants_sessions_at(CurationStage::Bids, None, None);
        assert_eq!(in_bids, vec![ParticipantSessionKey::parse("01", "BL").expect("valid key")]);
        assert!(!layout.processing_status().exists());
    }

    #[tokio::test]
    async fn test_bidsification_binds_bids_writable_and_source_readonly() {
        let (_dir, layout) = dataset(PipelineType::Bidsification, false);
        let backend = Arc::new(FakeBackend::default());

        runner(&layout, PipelineType::Bidsification, RunOptions::default(), backend.clone())
            .run()
            .await
            .expect("run completes");

        let bids = layout.bids().display().to_string();
        let post_reorg = layout.post_reorg().display().to_string();
        let command_lines = backend.command_lines.lock().expect("lock");
        assert_eq!(command_lines.len(), 2);
        for line in command_lines.iter() {
            assert!(line.contains(&format!("--bind {post_reorg}:{post_reorg}:ro ")), "{line}");
            assert!(line.contains(&format!("--bind {bids}:{bids} ")), "{line}");
            assert!(!line.contains(&format!("{bids}:{bids}:ro")), "{line}");
        }
    }

    #[tokio::test]
    async fn test_processing_binds_bids_readonly() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        let backend = Arc::new(FakeBackend::default());

        runner(&layout, PipelineType::Processing, RunOptions::default(), backend.clone())
            .run()
            .await
            .expect("run completes");

        let bids = layout.bids().display().to_string();
        let post_reorg = layout.post_reorg().display().to_string();
        let command_lines = backend.command_lines.lock().expect("lock");
        assert!(!command_lines.is_empty());
        for line in command_lines.iter() {
            assert!(line.contains(&format!("--bind {bids}:{bids}:ro ")), "{line}");
            assert!(!line.contains(&post_reorg), "{line}");
        }
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_unremovable_dir() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        // A plain file where the bids-db directory belongs cannot be removed as a directory.
        let bids_db = layout.pipeline_bids_db("demo", "1.0");
        std::fs::create_dir_all(bids_db.parent().expect("has parent")).expect("failed to create scratch");
        std::fs::write(&bids_db, "not a directory").expect("failed to write file");
        let backend = Arc::new(FakeBackend::default());

        let summary = runner(&layout, PipelineType::Processing, RunOptions::default(), backend)
            .run()
            .await
            .expect("run completes despite cleanup error");
        assert_eq!(summary.n_success, 2);

        let key = ParticipantSessionKey::parse("01", "BL").expect("valid key");
        assert!(!layout.pair_work("demo", "1.0", &key).exists());
        assert!(bids_db.is_file());
        assert!(layout.processing_status().is_file());
        assert!(layout.derivatives().join(".processing_status").is_dir());
    }

    #[tokio::test]
    async fn test_simulate_records_nothing() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        let backend = Arc::new(FakeBackend::default());
        let options = RunOptions {
            simulate: true,
            ..Default::default()
        };

        let summary = runner(&layout, PipelineType::Processing, options, backend.clone())
            .run()
            .await
            .expect("run completes");
        assert_eq!(summary.n_success, 2);
        assert!(backend
            .executed
            .lock()
            .expect("lock")
            .iter()
            .all(|(_, mode)| *mode == ExecMode::Simulate));
        assert!(!layout.processing_status().exists());
    }

    #[tokio::test]
    async fn test_dry_run_executes_and_writes_nothing() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        let backend = Arc::new(FakeBackend::default());
        let workflow_options = WorkflowOptions::new("demo").with_dry_run(true);

        let summary = PipelineRunner::new(layout.clone(), workflow_options, RunOptions::default())
            .expect("workflow loads")
            .with_backend(backend.clone())
            .run()
            .await
            .expect("run completes");
        assert_eq!(summary.n_success, 2);
        assert!(backend.executed.lock().expect("lock").is_empty());
        assert!(!layout.scratch().exists());
        assert!(!layout.processing_status().exists());
    }

    #[tokio::test]
    async fn test_write_list_skips_execution() {
        let (dir, layout) = dataset(PipelineType::Processing, false);
        let backend = Arc::new(FakeBackend::default());
        let list = dir.path().join("worklist.tsv");
        let options = RunOptions {
            write_list: Some(list.clone()),
            ..Default::default()
        };

        let summary = runner(&layout, PipelineType::Processing, options, backend.clone())
            .run()
            .await
            .expect("run completes");
        assert_eq!(summary.n_total, 0);
        assert!(backend.executed.lock().expect("lock").is_empty());
        assert_eq!(
            std::fs::read_to_string(list).expect("written"),
            "participant_id\tsession_id\n01\tBL\n02\tBL\n"
        );
    }

    #[tokio::test]
    async fn test_tar_requires_participant_session_dir() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        let options = RunOptions {
            tar: true,
            ..Default::default()
        };
        let result = runner(&layout, PipelineType::Processing, options, Arc::new(FakeBackend::default()))
            .run()
            .await;
        assert!(matches!(result, Err(WorkflowError::MissingTrackerConfig { .. })));
    }

    #[tokio::test]
    async fn test_tar_archives_outputs_after_success() {
        let (_dir, layout) = dataset(PipelineType::Processing, true);
        let output = layout.pipeline_output("demo", "1.0");
        for participant in ["sub-01", "sub-02"] {
            std::fs::create_dir_all(output.join(participant)).expect("failed to create output");
            std::fs::write(output.join(participant).join("done.txt"), "ok").expect("failed to write output");
        }
        let backend = Arc::new(FakeBackend {
            failing: vec!["02".to_string()],
            ..Default::default()
        });
        let options = RunOptions {
            tar: true,
            ..Default::default()
        };

        runner(&layout, PipelineType::Processing, options, backend)
            .run()
            .await
            .expect("run completes");

        assert!(output.join("sub-01.tar").is_file());
        assert!(!output.join("sub-01").exists());
        assert!(output.join("sub-02").is_dir());
        assert!(!output.join("sub-02.tar").exists());
    }

    #[tokio::test]
    async fn test_missing_container_command_is_setup_error() {
        let (_dir, layout) = dataset(PipelineType::Processing, false);
        std::fs::write(layout.global_config(), r#"{"CONTAINER_CONFIG": {"COMMAND": "no-such-engine-xyz"}}"#)
            .expect("failed to write global config");
        let backend = Arc::new(FakeBackend::default());

        let result = runner(&layout, PipelineType::Processing, RunOptions::default(), backend.clone())
            .run()
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Container(ContainerError::CommandNotFound(_)))
        ));
        assert!(backend.executed.lock().expect("lock").is_empty());
    }
}
