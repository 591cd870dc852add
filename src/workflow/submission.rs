//! Submission strategies: how a worklist is turned into work.
//!
//! [`LocalSequential`] processes pairs one after another in this process.
//! [`HpcBatch`] renders a scheduler job script that re-invokes the CLI for
//! each pair and submits it; this process never waits for the jobs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, info_span, Instrument};

use crate::config::HpcConfig;
use crate::container::shell_quote;
use crate::error::WorkflowError;
use crate::process::{run_streaming, Echo};
use crate::study::ParticipantSessionKey;

use super::{PairWorker, RunSummary};

/// Turns a worklist into work.
#[async_trait]
pub trait SubmissionStrategy: Send + Sync {
    /// Processes or submits every pair of `worklist`.
    ///
    /// Per-pair failures are counted, never returned. Only errors that
    /// prevent the whole batch from being handled are returned.
    async fn submit(
        &self,
        worker: &mut dyn PairWorker,
        worklist: &[ParticipantSessionKey],
    ) -> Result<RunSummary, WorkflowError>;
}

/// Runs pairs sequentially in worklist order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSequential;

#[async_trait]
impl SubmissionStrategy for LocalSequential {
    async fn submit(
        &self,
        worker: &mut dyn PairWorker,
        worklist: &[ParticipantSessionKey],
    ) -> Result<RunSummary, WorkflowError> {
        let mut summary = RunSummary {
            n_total: worklist.len(),
            ..Default::default()
        };

        for (i, key) in worklist.iter().enumerate() {
            let span = info_span!(
                "pair",
                participant_id = %key.participant_id,
                session_id = %key.session_id,
            );
            async {
                info!("Processing {} ({}/{})", key, i + 1, worklist.len());
                match worker.process_pair(key).await {
                    Ok(()) => {
                        summary.n_success += 1;
                        info!("Completed {}", key);
                    }
                    Err(e) => error!("Error processing {} with {}: {}", key, worker.workflow().identity, e),
                }
            }
            .instrument(span)
            .await;
        }

        Ok(summary)
    }
}

/// Supported HPC schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HpcCluster {
    Slurm,
    Sge,
}

impl HpcCluster {
    pub fn name(&self) -> &'static str {
        match self {
            HpcCluster::Slurm => "slurm",
            HpcCluster::Sge => "sge",
        }
    }

    /// Command that submits a job script.
    pub fn submit_command(&self) -> &'static str {
        match self {
            HpcCluster::Slurm => "sbatch",
            HpcCluster::Sge => "qsub",
        }
    }

    fn builtin_template(&self) -> &'static str {
        match self {
            HpcCluster::Slurm => SLURM_TEMPLATE,
            HpcCluster::Sge => SGE_TEMPLATE,
        }
    }
}

impl std::fmt::Display for HpcCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const SLURM_TEMPLATE: &str = r#"#!/bin/bash
#SBATCH --job-name={{ job_name }}
#SBATCH --output={{ log_dir }}/{{ job_name }}-%A_%a.out
{% if account %}#SBATCH --account={{ account }}
{% endif %}{% if partition %}#SBATCH --partition={{ partition }}
{% endif %}{% if time %}#SBATCH --time={{ time }}
{% endif %}{% if memory %}#SBATCH --mem={{ memory }}
{% endif %}{% if cores %}#SBATCH --cpus-per-task={{ cores }}
{% endif %}{% if array %}#SBATCH --array=0-{{ last_index }}
{% endif %}
{% for line in preamble %}{{ line }}
{% endfor %}
case "${SLURM_ARRAY_TASK_ID:-0}" in
{% for command in commands %}  {{ loop.index0 }}) {{ command }} ;;
{% endfor %}esac
"#;

const SGE_TEMPLATE: &str = r#"#!/bin/bash
#$ -N {{ job_name }}
#$ -o {{ log_dir }}
#$ -j y
#$ -cwd
{% if account %}#$ -A {{ account }}
{% endif %}{% if partition %}#$ -q {{ partition }}
{% endif %}{% if time %}#$ -l h_rt={{ time }}
{% endif %}{% if memory %}#$ -l h_vmem={{ memory }}
{% endif %}{% if cores %}#$ -pe smp {{ cores }}
{% endif %}{% if array %}#$ -t 1-{{ n_jobs }}
{% endif %}
{% for line in preamble %}{{ line }}
{% endfor %}
case "$(( ${SGE_TASK_ID:-1} - 1 ))" in
{% for command in commands %}  {{ loop.index0 }}) {{ command }} ;;
{% endfor %}esac
"#;

/// Values available to job script templates.
#[derive(Debug, Clone, Serialize)]
struct JobScript<'a> {
    job_name: String,
    log_dir: String,
    account: Option<&'a str>,
    partition: Option<&'a str>,
    time: Option<&'a str>,
    memory: Option<&'a str>,
    cores: Option<u32>,
    preamble: &'a [String],
    commands: Vec<String>,
    array: bool,
    n_jobs: usize,
    last_index: usize,
}

/// Renders job scripts for an HPC scheduler and submits them.
#[derive(Debug, Clone)]
pub struct HpcBatch {
    cluster: HpcCluster,
    config: HpcConfig,
    template_dir: PathBuf,
    script_dir: PathBuf,
    executable: String,
    submit_command: String,
    dry_run: bool,
}

impl HpcBatch {
    /// Creates a batch submitter.
    ///
    /// `template_dir` may hold `<cluster>.sh.tera` to override the built-in
    /// template; scripts and scheduler logs go to `script_dir`.
    pub fn new(cluster: HpcCluster, config: HpcConfig, template_dir: PathBuf, script_dir: PathBuf) -> Self {
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());
        Self {
            cluster,
            config,
            template_dir,
            script_dir,
            executable,
            submit_command: cluster.submit_command().to_string(),
            dry_run: false,
        }
    }

    /// Executable invoked by each job.
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Replaces `sbatch`/`qsub`.
    pub fn with_submit_command(mut self, command: impl Into<String>) -> Self {
        self.submit_command = command.into();
        self
    }

    /// Writes scripts without submitting them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn template(&self) -> Result<String, WorkflowError> {
        let custom = self
            .template_dir
            .join(format!("{}.sh.tera", self.cluster.name()));
        if custom.is_file() {
            info!("Using job template {}", custom.display());
            return Ok(std::fs::read_to_string(custom)?);
        }
        Ok(self.cluster.builtin_template().to_string())
    }

    /// CLI line that processes one pair.
    fn pair_command(&self, worker: &dyn PairWorker, key: &ParticipantSessionKey) -> String {
        let workflow = worker.workflow();
        let mut words = vec![
            self.executable.clone(),
            worker.command_name().to_string(),
            "--dataset".to_string(),
            workflow.layout.root().display().to_string(),
            "--pipeline".to_string(),
            workflow.identity.name.clone(),
            "--pipeline-version".to_string(),
            workflow.identity.version.clone(),
            "--pipeline-step".to_string(),
            workflow.identity.step.clone(),
            "--pipeline-type".to_string(),
            workflow.pipeline_type().to_string(),
        ];
        words.extend(worker.forwarded_args());
        words.extend([
            "--participant-id".to_string(),
            key.participant_id.to_string(),
            "--session-id".to_string(),
            key.session_id.to_string(),
        ]);
        words
            .iter()
            .map(|w| shell_quote(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn render(&self, template: &str, job_name: String, commands: Vec<String>) -> Result<String, WorkflowError> {
        let n_jobs = commands.len();
        let script = JobScript {
            job_name,
            log_dir: self.script_dir.display().to_string(),
            account: self.config.account.as_deref(),
            partition: self.config.partition.as_deref(),
            time: self.config.time.as_deref(),
            memory: self.config.memory.as_deref(),
            cores: self.config.cores,
            preamble: &self.config.preamble,
            commands,
            array: n_jobs > 1,
            n_jobs,
            last_index: n_jobs.saturating_sub(1),
        };
        let context = Context::from_serialize(&script)?;
        Ok(Tera::one_off(template, &context, false)?)
    }

    async fn submit_script(&self, script: &Path) -> Result<(), WorkflowError> {
        if self.dry_run {
            info!("[dry run] Would submit {} with {}", script.display(), self.submit_command);
            return Ok(());
        }

        let mut cmd = Command::new(&self.submit_command);
        cmd.arg(script);
        let output = run_streaming(cmd, Echo::Info)
            .await
            .map_err(|e| WorkflowError::Submission(format!("failed to run {}: {}", self.submit_command, e)))?;
        if !output.success() {
            return Err(WorkflowError::Submission(format!(
                "{} exited with code {}: {}",
                self.submit_command,
                output.exit_code,
                output.diagnostic()
            )));
        }
        info!("Submitted {}: {}", script.display(), output.stdout.trim());
        Ok(())
    }
}

#[async_trait]
impl SubmissionStrategy for HpcBatch {
    async fn submit(
        &self,
        worker: &mut dyn PairWorker,
        worklist: &[ParticipantSessionKey],
    ) -> Result<RunSummary, WorkflowError> {
        let summary = RunSummary {
            n_total: worklist.len(),
            n_success: worklist.len(),
            ..Default::default()
        };
        if worklist.is_empty() {
            return Ok(summary);
        }

        std::fs::create_dir_all(&self.script_dir)?;
        let template = self.template()?;
        let identity = &worker.workflow().identity;
        let base_name = format!(
            "{}-{}-{}-{}",
            worker.command_name(),
            identity.name,
            identity.version,
            identity.step
        );
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");

        let jobs: Vec<(String, Vec<String>)> = if self.config.job_per_pair {
            worklist
                .iter()
                .map(|key| {
                    (
                        format!("{base_name}-{}-{}", key.participant_id, key.session_id),
                        vec![self.pair_command(&*worker, key)],
                    )
                })
                .collect()
        } else {
            vec![(
                base_name.clone(),
                worklist
                    .iter()
                    .map(|key| self.pair_command(&*worker, key))
                    .collect(),
            )]
        };

        for (job_name, commands) in jobs {
            let script = self.render(&template, job_name.clone(), commands)?;
            let path = self
                .script_dir
                .join(format!("{job_name}-{timestamp}.sh"));
            std::fs::write(&path, script)?;
            info!("Wrote {} job script {}", self.cluster, path.display());
            self.submit_script(&path).await?;
        }

        info!("Submitted {} pairs to {}", worklist.len(), self.cluster);
        Ok(summary)
    }
}
