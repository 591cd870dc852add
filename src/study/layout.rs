//! Dataset directory layout.
//!
//! Maps the logical locations a workflow needs onto absolute paths under
//! the dataset root.

use std::path::{Path, PathBuf};

use crate::config::PipelineType;
use crate::template::TemplateContext;

use super::ids::ParticipantSessionKey;

/// Name of the dataset-wide configuration file.
pub const GLOBAL_CONFIG_FILE: &str = "global_config.json";
/// Name of the configuration file inside a pipeline bundle.
pub const PIPELINE_CONFIG_FILE: &str = "config.json";

/// Standard directory layout of a study dataset.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    /// Creates a layout rooted at `root`. Relative roots are made absolute.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_config(&self) -> PathBuf {
        self.root.join(GLOBAL_CONFIG_FILE)
    }

    pub fn bids(&self) -> PathBuf {
        self.root.join("bids")
    }

    pub fn sourcedata(&self) -> PathBuf {
        self.root.join("sourcedata").join("imaging")
    }

    /// Reorganized source data that bidsification pipelines convert.
    pub fn post_reorg(&self) -> PathBuf {
        self.sourcedata().join("post_reorg")
    }

    pub fn curation_status(&self) -> PathBuf {
        self.sourcedata().join("curation_status.tsv")
    }

    pub fn derivatives(&self) -> PathBuf {
        self.root.join("derivatives")
    }

    pub fn processing_status(&self) -> PathBuf {
        self.derivatives().join("processing_status.tsv")
    }

    pub fn containers(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn hpc_scripts(&self) -> PathBuf {
        self.logs().join("hpc")
    }

    /// Directory holding user overrides of the HPC job templates.
    pub fn hpc_templates(&self) -> PathBuf {
        self.root.join("code").join("hpc")
    }

    pub fn scratch(&self) -> PathBuf {
        self.root.join("scratch")
    }

    /// Directory holding installed bundles of the given pipeline type.
    pub fn pipeline_store(&self, pipeline_type: PipelineType) -> PathBuf {
        self.root.join("pipelines").join(pipeline_type.dir_name())
    }

    /// Directory of one installed pipeline bundle.
    pub fn pipeline_bundle(&self, pipeline_type: PipelineType, name: &str, version: &str) -> PathBuf {
        self.pipeline_store(pipeline_type)
            .join(format!("{name}-{version}"))
    }

    /// Output directory shared by every pair of one pipeline version.
    pub fn pipeline_output(&self, name: &str, version: &str) -> PathBuf {
        self.derivatives().join(name).join(version).join("output")
    }

    /// Working directory of one pipeline version.
    pub fn pipeline_work(&self, name: &str, version: &str) -> PathBuf {
        self.scratch().join("work").join(format!("{name}-{version}"))
    }

    /// Working directory owned by a single participant/session pair.
    pub fn pair_work(&self, name: &str, version: &str, key: &ParticipantSessionKey) -> PathBuf {
        self.pipeline_work(name, version).join(format!(
            "{name}-{version}-{}-{}",
            key.participant_id, key.session_id
        ))
    }

    pub fn pipeline_bids_db(&self, name: &str, version: &str) -> PathBuf {
        self.scratch()
            .join("bids_db")
            .join(format!("{name}-{version}"))
    }
}

impl TemplateContext for DatasetLayout {
    fn template_bindings(&self) -> Vec<(String, String)> {
        let display = |p: PathBuf| p.display().to_string();
        vec![
            ("DPATH_ROOT".to_string(), display(self.root.clone())),
            ("DPATH_BIDS".to_string(), display(self.bids())),
            ("DPATH_SOURCEDATA".to_string(), display(self.sourcedata())),
            ("DPATH_POST_REORG".to_string(), display(self.post_reorg())),
            ("DPATH_DERIVATIVES".to_string(), display(self.derivatives())),
            ("DPATH_CONTAINERS".to_string(), display(self.containers())),
            ("DPATH_LOGS".to_string(), display(self.logs())),
            ("DPATH_SCRATCH".to_string(), display(self.scratch())),
        ]
    }
}
