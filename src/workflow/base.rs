//! State shared by every pipeline workflow: resolved configuration,
//! dataset paths, template bindings, and worklist computation.

use std::path::PathBuf;

use tracing::{info, info_span, warn, Span};
use uuid::Uuid;

use crate::config::{GlobalConfig, PipelineConfig, PipelineKind, PipelineType, StepConfig};
use crate::error::{TableError, TemplateError, ValidationError, WorkflowError};
use crate::study::{
    DatasetLayout, ParticipantId, ParticipantSessionKey, PipelineIdentity, SessionId, PIPELINE_CONFIG_FILE,
};
use crate::tables::{CurationStage, CurationTable, StatusTable};
use crate::template::TemplateBindings;

use super::resolve::{resolve_step, resolve_version};

/// What to run, as requested by the caller.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub pipeline_name: String,
    pub pipeline_version: Option<String>,
    pub pipeline_step: Option<String>,
    pub pipeline_type: PipelineType,
    pub participant_id: Option<ParticipantId>,
    pub session_id: Option<SessionId>,
    /// Render and log everything, execute and write nothing.
    pub dry_run: bool,
}

impl WorkflowOptions {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_version: None,
            pipeline_step: None,
            pipeline_type: PipelineType::Processing,
            participant_id: None,
            session_id: None,
            dry_run: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = Some(version.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.pipeline_step = Some(step.into());
        self
    }

    pub fn with_pipeline_type(mut self, pipeline_type: PipelineType) -> Self {
        self.pipeline_type = pipeline_type;
        self
    }

    pub fn with_participant(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = Some(participant_id);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A pipeline step resolved against a dataset.
#[derive(Debug, Clone)]
pub struct PipelineWorkflow {
    pub layout: DatasetLayout,
    pub global_config: GlobalConfig,
    pub pipeline_config: PipelineConfig,
    pub step: StepConfig,
    pub identity: PipelineIdentity,
    /// Directory of the installed bundle.
    pub bundle: PathBuf,
    pub options: WorkflowOptions,
    pub run_id: Uuid,
}

impl PipelineWorkflow {
    /// Loads the global config, resolves version and step, and loads the
    /// pipeline bundle config.
    pub fn load(layout: DatasetLayout, options: WorkflowOptions) -> Result<Self, WorkflowError> {
        let global_config = GlobalConfig::load(&layout.global_config(), &layout)?;

        let name = options.pipeline_name.clone();
        let version = resolve_version(&layout, options.pipeline_type, &name, options.pipeline_version.as_deref())?;
        let bundle = layout.pipeline_bundle(options.pipeline_type, &name, &version);

        let bindings = TemplateBindings::new()
            .with_context(&layout)
            .merged(&global_config.user_bindings()?)
            .with_builtin("PIPELINE_NAME", name.as_str())
            .with_builtin("PIPELINE_VERSION", version.as_str())
            .with_builtin("DPATH_PIPELINE_OUTPUT", layout.pipeline_output(&name, &version).display().to_string())
            .with_builtin("DPATH_BIDS_DB", layout.pipeline_bids_db(&name, &version).display().to_string());
        let variables = global_config
            .pipeline_variables
            .get(options.pipeline_type, &name, &version);
        let pipeline_config = PipelineConfig::load(&bundle.join(PIPELINE_CONFIG_FILE), &bindings, variables)?;

        if pipeline_config.pipeline_type() != options.pipeline_type {
            return Err(ValidationError::InvalidPipelineConfig(format!(
                "bundle {} declares PIPELINE_TYPE '{}' but is installed as '{}'",
                bundle.display(),
                pipeline_config.pipeline_type(),
                options.pipeline_type
            ))
            .into());
        }

        let step = resolve_step(&pipeline_config, options.pipeline_step.as_deref())?.clone();
        let identity = PipelineIdentity::new(name, version, step.name.clone());

        Ok(Self {
            layout,
            global_config,
            pipeline_config,
            step,
            identity,
            bundle,
            options,
            run_id: Uuid::new_v4(),
        })
    }

    /// Span carrying the pipeline identity for every log line of one invocation.
    pub fn span(&self, command: &str) -> Span {
        info_span!(
            "workflow",
            command,
            run_id = %self.run_id,
            pipeline = %self.identity.name,
            version = %self.identity.version,
            step = %self.identity.step,
        )
    }

    pub fn pipeline_type(&self) -> PipelineType {
        self.pipeline_config.pipeline_type()
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn dpath_output(&self) -> PathBuf {
        self.layout
            .pipeline_output(&self.identity.name, &self.identity.version)
    }

    pub fn dpath_work(&self) -> PathBuf {
        self.layout
            .pipeline_work(&self.identity.name, &self.identity.version)
    }

    pub fn dpath_pair_work(&self, key: &ParticipantSessionKey) -> PathBuf {
        self.layout
            .pair_work(&self.identity.name, &self.identity.version, key)
    }

    pub fn dpath_bids_db(&self) -> PathBuf {
        self.layout
            .pipeline_bids_db(&self.identity.name, &self.identity.version)
    }

    /// Container image path. Relative paths are taken from the containers directory.
    pub fn fpath_container(&self) -> Option<PathBuf> {
        self.pipeline_config
            .container_info
            .file
            .as_ref()
            .map(|file| {
                if file.is_absolute() {
                    file.clone()
                } else {
                    self.layout.containers().join(file)
                }
            })
    }

    /// Bindings for one pair: pair ids, layout paths, user substitutions,
    /// pipeline variables, and pipeline attributes.
    pub fn pair_bindings(&self, key: &ParticipantSessionKey) -> Result<TemplateBindings, TemplateError> {
        let variables = self
            .global_config
            .pipeline_variables
            .get(self.pipeline_type(), &self.identity.name, &self.identity.version)
            .cloned()
            .unwrap_or_default();

        let mut bindings = TemplateBindings::for_pair(key)
            .with_context(&self.layout)
            .with_user(&self.global_config.substitutions)?
            .with_user(&variables)?
            .with_builtin("PIPELINE_NAME", self.identity.name.as_str())
            .with_builtin("PIPELINE_VERSION", self.identity.version.as_str())
            .with_builtin("PIPELINE_STEP", self.identity.step.as_str())
            .with_builtin("DPATH_PIPELINE_OUTPUT", self.dpath_output().display().to_string())
            .with_builtin("DPATH_PIPELINE_WORK", self.dpath_pair_work(key).display().to_string())
            .with_builtin("DPATH_BIDS_DB", self.dpath_bids_db().display().to_string());
        if let Some(container) = self.fpath_container() {
            bindings.insert_builtin("FPATH_CONTAINER", container.display().to_string());
        }
        Ok(bindings)
    }

    /// Loads the processing status table.
    ///
    /// A missing file or a file with the wrong schema yields an empty table;
    /// the latter is logged as a warning.
    pub fn load_status_table(&self) -> Result<StatusTable, WorkflowError> {
        let path = self.layout.processing_status();
        if !path.exists() {
            info!("No processing status table at {}, starting empty", path.display());
            return Ok(StatusTable::new());
        }
        match StatusTable::load(&path) {
            Ok(table) => Ok(table),
            Err(e @ (TableError::Schema { .. } | TableError::MalformedRow { .. })) => {
                warn!("Ignoring invalid processing status table: {}", e);
                Ok(StatusTable::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the curation status table; a missing file yields an empty table.
    pub fn load_curation_table(&self) -> Result<CurationTable, WorkflowError> {
        let path = self.layout.curation_status();
        if !path.exists() {
            warn!("No curation status table at {}", path.display());
            return Ok(CurationTable::new());
        }
        Ok(CurationTable::load(&path)?)
    }

    /// Pairs the upstream stage has made ready for this pipeline, in
    /// upstream order, narrowed by the participant/session filters.
    pub fn ready_pairs(&self, curation: &CurationTable, status: &StatusTable) -> Vec<ParticipantSessionKey> {
        let participant = self.options.participant_id.as_ref();
        let session = self.options.session_id.as_ref();
        match &self.pipeline_config.kind {
            PipelineKind::Processing => curation.participants_sessions_at(CurationStage::Bids, participant, session),
            PipelineKind::Bidsification => {
                curation.participants_sessions_at(CurationStage::PostReorg, participant, session)
            }
            PipelineKind::Extraction { proc_dependencies } => {
                let mut ready: Option<Vec<ParticipantSessionKey>> = None;
                for dependency in proc_dependencies {
                    let completed = status.get_completed_participants_sessions(
                        &dependency.name,
                        &dependency.version,
                        Some(&dependency.step),
                        participant,
                        session,
                    );
                    ready = Some(match ready {
                        None => completed,
                        Some(previous) => previous.into_iter().filter(|k| completed.contains(k)).collect(),
                    });
                }
                ready.unwrap_or_default()
            }
        }
    }

    /// Pairs already completed for this pipeline identity.
    pub fn completed_pairs(&self, curation: &CurationTable, status: &StatusTable) -> Vec<ParticipantSessionKey> {
        let participant = self.options.participant_id.as_ref();
        let session = self.options.session_id.as_ref();
        match self.pipeline_type() {
            PipelineType::Bidsification => curation.participants_sessions_at(CurationStage::Bids, participant, session),
            PipelineType::Processing | PipelineType::Extraction => status.get_completed_participants_sessions(
                &self.identity.name,
                &self.identity.version,
                Some(&self.identity.step),
                participant,
                session,
            ),
        }
    }
}

/// Ready pairs minus completed pairs, keeping the ready order.
pub fn eligible_pairs(
    ready: &[ParticipantSessionKey],
    completed: &[ParticipantSessionKey],
) -> Vec<ParticipantSessionKey> {
    let completed: std::collections::HashSet<&ParticipantSessionKey> = completed.iter().collect();
    ready
        .iter()
        .filter(|k| !completed.contains(k))
        .cloned()
        .collect()
}
