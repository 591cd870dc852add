//! Processing status table.
//!
//! One row per (participant, session, pipeline name, version, step). Adding
//! a record whose key already exists overwrites the status in place; rows
//! are never removed.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TableError;
use crate::study::{ParticipantId, ParticipantSessionKey, PipelineIdentity, SessionId};

use super::tsv;

/// Column order used when saving.
pub const COLUMNS: [&str; 6] = [
    "participant_id",
    "session_id",
    "pipeline_name",
    "pipeline_version",
    "pipeline_step",
    "status",
];

/// Processing outcome of one pair for one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Success,
    Fail,
    Incomplete,
    Unavailable,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "SUCCESS",
            ProcessingStatus::Fail => "FAIL",
            ProcessingStatus::Incomplete => "INCOMPLETE",
            ProcessingStatus::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ProcessingStatus::Success),
            "FAIL" => Ok(ProcessingStatus::Fail),
            "INCOMPLETE" => Ok(ProcessingStatus::Incomplete),
            "UNAVAILABLE" => Ok(ProcessingStatus::Unavailable),
            other => Err(TableError::InvalidStatus(other.to_string())),
        }
    }
}

/// One row of the processing status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub key: ParticipantSessionKey,
    pub pipeline: PipelineIdentity,
    pub status: ProcessingStatus,
}

impl StatusRecord {
    pub fn new(key: ParticipantSessionKey, pipeline: PipelineIdentity, status: ProcessingStatus) -> Self {
        Self {
            key,
            pipeline,
            status,
        }
    }

    fn table_key(&self) -> RecordKey {
        (self.key.clone(), self.pipeline.clone())
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.key.participant_id.to_string(),
            self.key.session_id.to_string(),
            self.pipeline.name.clone(),
            self.pipeline.version.clone(),
            self.pipeline.step.clone(),
            self.status.to_string(),
        ]
    }
}

type RecordKey = (ParticipantSessionKey, PipelineIdentity);

/// In-memory processing status table with upsert semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTable {
    records: Vec<StatusRecord>,
    index: HashMap<RecordKey, usize>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[StatusRecord] {
        &self.records
    }

    /// Returns the status of one pair for one pipeline identity.
    pub fn status(&self, key: &ParticipantSessionKey, pipeline: &PipelineIdentity) -> Option<ProcessingStatus> {
        self.index
            .get(&(key.clone(), pipeline.clone()))
            .map(|&i| self.records[i].status)
    }

    /// Upserts records by composite key and returns the updated table.
    pub fn add_or_update_records(mut self, records: impl IntoIterator<Item = StatusRecord>) -> Self {
        for record in records {
            match self.index.get(&record.table_key()) {
                Some(&i) => self.records[i].status = record.status,
                None => {
                    self.index.insert(record.table_key(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        self
    }

    /// Pairs whose status is `SUCCESS` for the given pipeline.
    ///
    /// `step = None` accepts any step. Results keep table order and are
    /// deduplicated.
    pub fn get_completed_participants_sessions(
        &self,
        pipeline_name: &str,
        pipeline_version: &str,
        pipeline_step: Option<&str>,
        participant_id: Option<&ParticipantId>,
        session_id: Option<&SessionId>,
    ) -> Vec<ParticipantSessionKey> {
        let mut completed: Vec<ParticipantSessionKey> = Vec::new();
        for record in &self.records {
            let matches = record.status == ProcessingStatus::Success
                && record.pipeline.name == pipeline_name
                && record.pipeline.version == pipeline_version
                && pipeline_step.map_or(true, |s| record.pipeline.step == s)
                && record.key.matches(participant_id, session_id);
            if matches && !completed.contains(&record.key) {
                completed.push(record.key.clone());
            }
        }
        completed
    }

    /// Loads a table, failing with a schema error if the columns differ.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let doc = tsv::read_tsv(path)?;
        let columns = doc.column_indices(path, &COLUMNS)?;

        let mut records = Vec::with_capacity(doc.rows.len());
        for (line, cells) in &doc.rows {
            let malformed = |reason: String| TableError::MalformedRow {
                path: path.to_path_buf(),
                line: *line,
                reason,
            };
            if cells.len() != COLUMNS.len() {
                return Err(malformed(format!(
                    "expected {} cells, found {}",
                    COLUMNS.len(),
                    cells.len()
                )));
            }
            let cell = |i: usize| cells[columns[i]].as_str();
            let key = ParticipantSessionKey::parse(cell(0), cell(1))
                .map_err(|e| malformed(e.to_string()))?;
            let pipeline = PipelineIdentity::new(cell(2), cell(3), cell(4));
            let status = cell(5)
                .parse::<ProcessingStatus>()
                .map_err(|e| malformed(e.to_string()))?;
            records.push(StatusRecord::new(key, pipeline, status));
        }

        debug!("Loaded {} status records from {}", records.len(), path.display());
        Ok(Self::new().add_or_update_records(records))
    }

    /// Renders the table as TSV.
    pub fn to_tsv(&self) -> String {
        tsv::render_tsv(&COLUMNS, self.records.iter().map(StatusRecord::to_row))
    }

    /// Writes the table atomically.
    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        tsv::write_atomic(path, &self.to_tsv())?;
        Ok(())
    }

    /// Writes the table and keeps a timestamped backup; no-op when unchanged.
    pub fn save_with_backup(&self, path: &Path) -> Result<Option<PathBuf>, TableError> {
        Ok(tsv::write_with_backup(path, &self.to_tsv())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(p: &str, s: &str) -> ParticipantSessionKey {
        ParticipantSessionKey::parse(p, s).expect("valid key")
    }

    fn demo() -> PipelineIdentity {
        PipelineIdentity::new("demo", "1.0", "default")
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let record = StatusRecord::new(key("01", "BL"), demo(), ProcessingStatus::Success);
        let once = StatusTable::new().add_or_update_records([record.clone()]);
        let twice = once.clone().add_or_update_records([record]);
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_upsert_overwrites_status() {
        let table = StatusTable::new()
            .add_or_update_records([StatusRecord::new(key("01", "BL"), demo(), ProcessingStatus::Success)])
            .add_or_update_records([StatusRecord::new(key("sub-01", "ses-BL"), demo(), ProcessingStatus::Fail)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.status(&key("01", "BL"), &demo()), Some(ProcessingStatus::Fail));
    }

    #[test]
    fn test_completed_filters_by_identity_and_pair() {
        let other_version = PipelineIdentity::new("demo", "2.0", "default");
        let table = StatusTable::new().add_or_update_records([
            StatusRecord::new(key("01", "BL"), demo(), ProcessingStatus::Success),
            StatusRecord::new(key("02", "BL"), demo(), ProcessingStatus::Fail),
            StatusRecord::new(key("03", "M12"), demo(), ProcessingStatus::Success),
            StatusRecord::new(key("04", "BL"), other_version, ProcessingStatus::Success),
        ]);

        let completed = table.get_completed_participants_sessions("demo", "1.0", Some("default"), None, None);
        assert_eq!(completed, vec![key("01", "BL"), key("03", "M12")]);

        let session = SessionId::new("M12").expect("valid id");
        let completed = table.get_completed_participants_sessions("demo", "1.0", None, None, Some(&session));
        assert_eq!(completed, vec![key("03", "M12")]);

        assert!(table
            .get_completed_participants_sessions("demo", "1.0", Some("other"), None, None)
            .is_empty());
    }

    #[test]
    fn test_any_step_results_are_deduplicated() {
        let table = StatusTable::new().add_or_update_records([
            StatusRecord::new(key("01", "BL"), PipelineIdentity::new("p", "1", "a"), ProcessingStatus::Success),
            StatusRecord::new(key("01", "BL"), PipelineIdentity::new("p", "1", "b"), ProcessingStatus::Success),
        ]);
        assert_eq!(
            table.get_completed_participants_sessions("p", "1", None, None, None),
            vec![key("01", "BL")]
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("derivatives").join("processing_status.tsv");
        let table = StatusTable::new().add_or_update_records([
            StatusRecord::new(key("01", "BL"), demo(), ProcessingStatus::Success),
            StatusRecord::new(key("02", "BL"), demo(), ProcessingStatus::Incomplete),
        ]);

        table.save(&path).expect("saved");
        let loaded = StatusTable::load(&path).expect("loaded");
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_load_rejects_wrong_schema() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("processing_status.tsv");
        std::fs::write(&path, "participant_id\tsession_id\tstatus\n01\tBL\tSUCCESS\n").expect("failed to write");
        assert!(matches!(StatusTable::load(&path), Err(TableError::Schema { .. })));
    }

    #[test]
    fn test_load_rejects_bad_status() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("processing_status.tsv");
        std::fs::write(
            &path,
            format!("{}\n01\tBL\tdemo\t1.0\tdefault\tDONE\n", COLUMNS.join("\t")),
        )
        .expect("failed to write");
        assert!(matches!(
            StatusTable::load(&path),
            Err(TableError::MalformedRow { line: 2, .. })
        ));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("success".parse::<ProcessingStatus>().expect("valid"), ProcessingStatus::Success);
        assert_eq!(ProcessingStatus::Unavailable.to_string(), "UNAVAILABLE");
    }
}
