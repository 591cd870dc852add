//! Curation status table: how far each participant/session has progressed
//! through reorganization and BIDS conversion.
//!
//! This is the upstream readiness source for every workflow. Row order is
//! preserved so worklists follow the order pairs were curated in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::TableError;
use crate::study::{ParticipantId, ParticipantSessionKey, SessionId};

use super::tsv;

pub const COLUMNS: [&str; 5] = [
    "participant_id",
    "session_id",
    "in_pre_reorg",
    "in_post_reorg",
    "in_bids",
];

/// A curation stage a pair can have reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurationStage {
    PreReorg,
    PostReorg,
    Bids,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurationRecord {
    pub key: ParticipantSessionKey,
    pub in_pre_reorg: bool,
    pub in_post_reorg: bool,
    pub in_bids: bool,
}

impl CurationRecord {
    /// A record for a pair that has not reached any stage yet.
    pub fn new(key: ParticipantSessionKey) -> Self {
        Self {
            key,
            in_pre_reorg: false,
            in_post_reorg: false,
            in_bids: false,
        }
    }

    pub fn with_stage(mut self, stage: CurationStage, value: bool) -> Self {
        self.set(stage, value);
        self
    }

    pub fn at(&self, stage: CurationStage) -> bool {
        match stage {
            CurationStage::PreReorg => self.in_pre_reorg,
            CurationStage::PostReorg => self.in_post_reorg,
            CurationStage::Bids => self.in_bids,
        }
    }

    fn set(&mut self, stage: CurationStage, value: bool) {
        match stage {
            CurationStage::PreReorg => self.in_pre_reorg = value,
            CurationStage::PostReorg => self.in_post_reorg = value,
            CurationStage::Bids => self.in_bids = value,
        }
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.key.participant_id.to_string(),
            self.key.session_id.to_string(),
            self.in_pre_reorg.to_string(),
            self.in_post_reorg.to_string(),
            self.in_bids.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurationTable {
    records: Vec<CurationRecord>,
    index: HashMap<ParticipantSessionKey, usize>,
}

impl CurationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CurationRecord] {
        &self.records
    }

    pub fn get(&self, key: &ParticipantSessionKey) -> Option<&CurationRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    /// Inserts a record or replaces the flags of an existing one.
    pub fn add_or_update(mut self, record: CurationRecord) -> Self {
        match self.index.get(&record.key) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.key.clone(), self.records.len());
                self.records.push(record);
            }
        }
        self
    }

    /// Sets one stage flag for a pair, adding the pair if it is unknown.
    pub fn mark(self, key: &ParticipantSessionKey, stage: CurationStage, value: bool) -> Self {
        let record = self
            .get(key)
            .cloned()
            .unwrap_or_else(|| CurationRecord::new(key.clone()))
            .with_stage(stage, value);
        self.add_or_update(record)
    }

    /// Pairs that have reached `stage`, in table order.
    pub fn participants_sessions_at(
        &self,
        stage: CurationStage,
        participant_id: Option<&ParticipantId>,
        session_id: Option<&SessionId>,
    ) -> Vec<ParticipantSessionKey> {
        self.records
            .iter()
            .filter(|r| r.at(stage) && r.key.matches(participant_id, session_id))
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let doc = tsv::read_tsv(path)?;
        let columns = doc.column_indices(path, &COLUMNS)?;

        let mut table = Self::new();
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
            let flag = |i: usize| {
                tsv::parse_bool(cell(i))
                    .ok_or_else(|| malformed(format!("'{}' is not a boolean in column {}", cell(i), COLUMNS[i])))
            };

            let key = ParticipantSessionKey::parse(cell(0), cell(1)).map_err(|e| malformed(e.to_string()))?;
            table = table.add_or_update(CurationRecord {
                key,
                in_pre_reorg: flag(2)?,
                in_post_reorg: flag(3)?,
                in_bids: flag(4)?,
            });
        }

        debug!("Loaded {} curation records from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn to_tsv(&self) -> String {
        tsv::render_tsv(&COLUMNS, self.records.iter().map(CurationRecord::to_row))
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        tsv::write_atomic(path, &self.to_tsv())?;
        Ok(())
    }

    pub fn save_with_backup(&self, path: &Path) -> Result<Option<PathBuf>, TableError> {
        Ok(tsv::write_with_backup(path, &self.to_tsv())?)
    }
}
