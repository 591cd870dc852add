//! Minimal tab-separated table I/O shared by the status tables.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::TableError;

/// A parsed TSV file: header plus data rows tagged with their line number.
#[derive(Debug)]
pub(crate) struct TsvDocument {
    pub header: Vec<String>,
    pub rows: Vec<(usize, Vec<String>)>,
}

impl TsvDocument {
    /// Maps each expected column to its index in the file.
    ///
    /// Column order is free; a missing or unexpected column is a schema error.
    pub fn column_indices(&self, path: &Path, expected: &[&str]) -> Result<Vec<usize>, TableError> {
        let schema_error = || TableError::Schema {
            path: path.to_path_buf(),
            expected: expected.iter().map(|c| c.to_string()).collect(),
            found: self.header.clone(),
        };

        if self.header.len() != expected.len() {
            return Err(schema_error());
        }
        expected
            .iter()
            .map(|column| {
                self.header
                    .iter()
                    .position(|h| h == column)
                    .ok_or_else(schema_error)
            })
            .collect()
    }
}

pub(crate) fn read_tsv(path: &Path) -> Result<TsvDocument, TableError> {
    let content = String::from_utf8(std::fs::read(path)?).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        TableError::MalformedRow {
            path: path.to_path_buf(),
            line: valid.iter().filter(|&&b| b == b'\n').count() + 1,
            reason: "not valid UTF-8".to_string(),
        }
    })?;
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let header = match lines.next() {
        Some((_, line)) => line.split('\t').map(|c| c.trim().to_string()).collect(),
        None => Vec::new(),
    };

    let rows = lines
        .map(|(index, line)| {
            let cells = line.split('\t').map(|c| c.trim().to_string()).collect();
            (index + 1, cells)
        })
        .collect();

    Ok(TsvDocument { header, rows })
}

pub(crate) fn render_tsv(header: &[&str], rows: impl Iterator<Item = Vec<String>>) -> String {
    let mut out = header.join("\t");
    out.push('\n');
    for row in rows {
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

/// Replaces `path` with `contents` through a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Writes `contents` and keeps a timestamped copy in `<dir>/.<stem>/`.
///
/// The file is rewritten only if its contents differ. The backup is skipped
/// when the newest existing backup already holds exactly `contents`.
/// Returns the backup path when one was written.
pub(crate) fn write_with_backup(path: &Path, contents: &str) -> std::io::Result<Option<PathBuf>> {
    let unchanged = std::fs::read_to_string(path).is_ok_and(|existing| existing == contents);
    if !unchanged {
        write_atomic(path, contents)?;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "tsv".to_string());
    let backup_dir = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{stem}"));

    if let Some(latest) = latest_backup(&backup_dir, &stem)? {
        if std::fs::read_to_string(&latest).is_ok_and(|backup| backup == contents) {
            debug!("{} matches backup {}, skipping", path.display(), latest.display());
            return Ok(None);
        }
    }

    std::fs::create_dir_all(&backup_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.6f");
    let backup = backup_dir.join(format!("{stem}-{timestamp}.{extension}"));
    std::fs::copy(path, &backup)?;
    debug!("Backed up {} to {}", path.display(), backup.display());
    Ok(Some(backup))
}

/// Newest backup in `backup_dir`; timestamped names sort chronologically.
fn latest_backup(backup_dir: &Path, stem: &str) -> std::io::Result<Option<PathBuf>> {
    if !backup_dir.is_dir() {
        return Ok(None);
    }
    let prefix = format!("{stem}-");
    let mut latest: Option<PathBuf> = None;
    for entry in std::fs::read_dir(backup_dir)? {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(&prefix));
        if is_backup && latest.as_ref().map_or(true, |l| path > *l) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

/// Parses a boolean cell (`true`/`false`, case-insensitive).
pub(crate) fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
