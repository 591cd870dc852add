//! End-to-end tests of the run and track workflows on a temporary dataset.
//!
//! The Boutiques engine is replaced by an in-memory backend, so no `bosh` or
//! container engine is needed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::tempdir;

use studyforge::boutiques::{BoutiquesBackend, ExecMode};
use studyforge::config::PipelineType;
use studyforge::study::{DatasetLayout, ParticipantSessionKey, PipelineIdentity};
use studyforge::tables::{CurationRecord, CurationStage, CurationTable, ProcessingStatus, StatusTable};
use studyforge::workflow::{PipelineRunner, PipelineTracker, ReturnCode, RunOptions, WorkflowOptions};
use studyforge::BoutiquesError;

/// Backend that exits non-zero for listed participants and records every
/// rendered invocation it executes.
#[derive(Default)]
struct FakeBoutiques {
    failing: Mutex<BTreeSet<String>>,
    invalid: Mutex<BTreeSet<String>>,
    executed: Mutex<Vec<(Value, BTreeMap<String, String>)>>,
}

impl FakeBoutiques {
    fn failing(participants: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        backend.set_failing(participants);
        Arc::new(backend)
    }

    fn set_failing(&self, participants: &[&str]) {
        *self.failing.lock().expect("lock") = participants.iter().map(|p| p.to_string()).collect();
    }

    fn executed_participants(&self) -> Vec<String> {
        self.executed
            .lock()
            .expect("lock")
            .iter()
            .map(|(invocation, _)| invocation["participant"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

fn participant(invocation: &Value) -> String {
    invocation["participant"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl BoutiquesBackend for FakeBoutiques {
    async fn validate_descriptor(&self, _descriptor: &Value) -> Result<(), BoutiquesError> {
        Ok(())
    }

    async fn validate_invocation(&self, _descriptor: &Value, invocation: &Value) -> Result<(), BoutiquesError> {
        if self.invalid.lock().expect("lock").contains(&participant(invocation)) {
            return Err(BoutiquesError::InvocationInvalid("rejected by test".to_string()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        _descriptor: &Value,
        invocation: &Value,
        _mode: ExecMode,
        env: &BTreeMap<String, String>,
    ) -> Result<i32, BoutiquesError> {
        self.executed
            .lock()
            .expect("lock")
            .push((invocation.clone(), env.clone()));
        let fails = self.failing.lock().expect("lock").contains(&participant(invocation));
        Ok(if fails { 1 } else { 0 })
    }
}

fn key(p: &str) -> ParticipantSessionKey {
    ParticipantSessionKey::parse(p, "BL").expect("valid key")
}

fn identity() -> PipelineIdentity {
    PipelineIdentity::new("demo", "1.0", "default")
}

/// Creates a dataset with one processing pipeline `demo-1.0` and the given
/// participants (session `BL`) converted to BIDS.
fn create_dataset(root: &Path, participants: &[&str], tracker_paths: &[&str]) -> DatasetLayout {
    let layout = DatasetLayout::new(root).expect("valid root");
    std::fs::write(
        layout.global_config(),
        r#"{
            "SUBSTITUTIONS": {"[[TEMPLATEFLOW_HOME]]": "/opt/templateflow"},
            "CONTAINER_CONFIG": {"COMMAND": "sh", "ENV_VARS": {"OMP_NUM_THREADS": "1"}}
        }"#,
    )
    .expect("failed to write global config");

    let bundle = layout.pipeline_bundle(PipelineType::Processing, "demo", "1.0");
    std::fs::create_dir_all(&bundle).expect("failed to create bundle");
    std::fs::write(
        bundle.join("config.json"),
        r#"{
            "NAME": "demo",
            "VERSION": "1.0",
            "PIPELINE_TYPE": "processing",
            "STEPS": [{
                "DESCRIPTOR_FILE": "descriptor.json",
                "INVOCATION_FILE": "invocation.json",
                "TRACKER_CONFIG_FILE": "tracker.json"
            }]
        }"#,
    )
    .expect("failed to write pipeline config");
    std::fs::write(
        bundle.join("descriptor.json"),
        r#"{
            "name": "demo",
            "tool-version": "1.0",
            "command-line": "[[STUDYFORGE_CONTAINER_COMMAND]] demo [PARTICIPANT] [OUT]",
            "inputs": [
                {"id": "participant", "type": "String", "value-key": "[PARTICIPANT]"},
                {"id": "out", "type": "String", "value-key": "[OUT]"}
            ]
        }"#,
    )
    .expect("failed to write descriptor");
    std::fs::write(
        bundle.join("invocation.json"),
        r#"{
            "participant": "[[STUDYFORGE_PARTICIPANT_ID]]",
            "out": "[[STUDYFORGE_DPATH_PIPELINE_OUTPUT]]/[[STUDYFORGE_BIDS_PARTICIPANT_ID]]",
            "templates": "[[TEMPLATEFLOW_HOME]]"
        }"#,
    )
    .expect("failed to write invocation");
    std::fs::write(
        bundle.join("tracker.json"),
        serde_json::json!({ "PATHS": tracker_paths }).to_string(),
    )
    .expect("failed to write tracker config");

    let curation = participants.iter().fold(CurationTable::new(), |table, p| {
        table.add_or_update(
            CurationRecord::new(key(p))
                .with_stage(CurationStage::PreReorg, true)
                .with_stage(CurationStage::PostReorg, true)
                .with_stage(CurationStage::Bids, true),
        )
    });
    curation
        .save(&layout.curation_status())
        .expect("failed to save curation table");
    layout
}

fn runner(layout: &DatasetLayout, backend: Arc<FakeBoutiques>) -> PipelineRunner {
    PipelineRunner::new(layout.clone(), WorkflowOptions::new("demo"), RunOptions::default())
        .expect("workflow loads")
        .with_backend(backend)
}

fn load_status(layout: &DatasetLayout) -> StatusTable {
    StatusTable::load(&layout.processing_status()).expect("status table saved")
}

#[tokio::test]
async fn test_partial_failure_records_only_successes() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01", "02"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&["02"]);

    let summary = runner(&layout, backend.clone()).run().await.expect("run completes");
    assert_eq!((summary.n_total, summary.n_success), (2, 1));
    assert_eq!(summary.return_code(), ReturnCode::PartialSuccess);
    assert_eq!(backend.executed_participants(), vec!["01", "02"]);

    let status = load_status(&layout);
    assert_eq!(status.len(), 1);
    assert_eq!(status.status(&key("01"), &identity()), Some(ProcessingStatus::Success));
    assert_eq!(status.status(&key("02"), &identity()), None);

    // Work directories are kept after a partial failure.
    assert!(layout.pair_work("demo", "1.0", &key("01")).is_dir());
}

#[tokio::test]
async fn test_rerun_only_processes_remaining_pairs() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01", "02", "03"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&["02"]);

    runner(&layout, backend.clone()).run().await.expect("first run completes");
    let first = load_status(&layout).get_completed_participants_sessions("demo", "1.0", None, None, None);

    backend.set_failing(&[]);
    let summary = runner(&layout, backend.clone()).run().await.expect("second run completes");
    assert_eq!((summary.n_ready, summary.n_total, summary.n_success), (3, 1, 1));
    assert_eq!(summary.return_code(), ReturnCode::Success);
    assert_eq!(backend.executed_participants(), vec!["01", "02", "03", "02"]);

    let second = load_status(&layout).get_completed_participants_sessions("demo", "1.0", None, None, None);
    assert!(first.iter().all(|k| second.contains(k)));
    assert_eq!(second.len(), 3);

    // Everything succeeded: work directories are cleaned up.
    assert!(!layout.pair_work("demo", "1.0", &key("02")).exists());
    assert!(!layout.pipeline_bids_db("demo", "1.0").exists());

    let summary = runner(&layout, backend.clone()).run().await.expect("third run completes");
    assert_eq!((summary.n_ready, summary.n_total), (3, 0));
    assert_eq!(summary.return_code(), ReturnCode::Success);
    assert_eq!(backend.executed_participants().len(), 4);
}

#[tokio::test]
async fn test_invocation_is_rendered_per_pair() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&[]);

    runner(&layout, backend.clone()).run().await.expect("run completes");

    let executed = backend.executed.lock().expect("lock");
    let (invocation, env) = &executed[0];
    assert_eq!(invocation["participant"], "01");
    assert_eq!(invocation["templates"], "/opt/templateflow");
    let out = invocation["out"].as_str().expect("string");
    assert_eq!(
        Path::new(out),
        layout.pipeline_output("demo", "1.0").join("sub-01")
    );
    assert_eq!(env.get("OMP_NUM_THREADS").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_invalid_invocation_is_isolated() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01", "02"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&[]);
    backend.invalid.lock().expect("lock").insert("01".to_string());

    let summary = runner(&layout, backend.clone()).run().await.expect("run completes");
    assert_eq!((summary.n_total, summary.n_success), (2, 1));
    assert_eq!(backend.executed_participants(), vec!["02"]);
    assert_eq!(load_status(&layout).status(&key("02"), &identity()), Some(ProcessingStatus::Success));
}

#[tokio::test]
async fn test_nothing_to_run_without_ready_pairs() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &[], &["out/result.txt"]);

    let summary = runner(&layout, FakeBoutiques::failing(&[]))
        .run()
        .await
        .expect("run completes");
    assert_eq!(summary.return_code(), ReturnCode::NothingToRun);
}

#[tokio::test]
async fn test_participant_filter_narrows_worklist() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01", "02"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&[]);

    let options = WorkflowOptions::new("demo").with_participant("sub-02".parse().expect("valid id"));
    PipelineRunner::new(layout.clone(), options, RunOptions::default())
        .expect("workflow loads")
        .with_backend(backend.clone())
        .run()
        .await
        .expect("run completes");
    assert_eq!(backend.executed_participants(), vec!["02"]);
}

#[tokio::test]
async fn test_tracker_follows_files_on_disk() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01"], &["out/result.txt"]);
    let result = layout.pipeline_output("demo", "1.0").join("out").join("result.txt");
    std::fs::create_dir_all(result.parent().expect("has parent")).expect("failed to create dir");
    std::fs::write(&result, "done").expect("failed to write result");

    let track = || async {
        PipelineTracker::new(layout.clone(), WorkflowOptions::new("demo"))
            .expect("workflow loads")
            .run()
            .await
            .expect("tracking completes")
    };

    let summary = track().await;
    assert_eq!(summary.return_code(), ReturnCode::Success);
    assert_eq!(load_status(&layout).status(&key("01"), &identity()), Some(ProcessingStatus::Success));

    std::fs::remove_file(&result).expect("failed to remove result");
    let summary = track().await;
    assert_eq!(summary.return_code(), ReturnCode::Failure);
    let status = load_status(&layout);
    assert_eq!(status.len(), 1);
    assert_eq!(status.status(&key("01"), &identity()), Some(ProcessingStatus::Fail));
}

#[tokio::test]
async fn test_dry_run_leaves_dataset_untouched() {
    let dir = tempdir().expect("failed to create temp dir");
    let layout = create_dataset(dir.path(), &["01"], &["out/result.txt"]);
    let backend = FakeBoutiques::failing(&[]);

    let options = WorkflowOptions::new("demo").with_dry_run(true);
    let summary = PipelineRunner::new(layout.clone(), options, RunOptions::default())
        .expect("workflow loads")
        .with_backend(backend.clone())
        .run()
        .await
        .expect("dry run completes");

    assert_eq!(summary.n_total, 1);
    assert!(backend.executed_participants().is_empty());
    assert!(!layout.processing_status().exists());
    assert!(!layout.derivatives().join("demo").exists());
}
