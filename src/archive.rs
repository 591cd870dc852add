//! Archiving of per-pair output directories.
//!
//! A directory is packed into `<dir>.tar` by the system `tar`, the archive is
//! read back with the `tar` crate, and only a readable, non-empty archive
//! allows the source directory to be deleted.

use std::fs::File;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{error, info};

use crate::error::FileOperationError;
use crate::process::{run_streaming, Echo};

/// Result of an archiving attempt that got as far as running `tar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The archive was verified and the source directory removed.
    Archived(PathBuf),
    /// The archive could not be verified; the source directory is untouched.
    SourceKept { archive: PathBuf, reason: String },
}

impl ArchiveOutcome {
    pub fn is_archived(&self) -> bool {
        matches!(self, ArchiveOutcome::Archived(_))
    }
}

/// Packs directories with an external `tar` executable.
#[derive(Debug, Clone)]
pub struct Archiver {
    tar_command: String,
}

impl Default for Archiver {
    fn default() -> Self {
        Self {
            tar_command: "tar".to_string(),
        }
    }
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tar_command(mut self, command: impl Into<String>) -> Self {
        self.tar_command = command.into();
        self
    }

    /// Creates `<dpath>.tar` and removes `dpath` once the archive verifies.
    pub async fn tar_and_remove(&self, dpath: &Path) -> Result<ArchiveOutcome, FileOperationError> {
        if !dpath.exists() {
            return Err(FileOperationError::NotFound(dpath.to_path_buf()));
        }
        if !dpath.is_dir() {
            return Err(FileOperationError::NotADirectory(dpath.to_path_buf()));
        }
        let (parent, name) = match (dpath.parent(), dpath.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Err(FileOperationError::NotADirectory(dpath.to_path_buf())),
        };

        let archive = tar_path(dpath);
        if archive.exists() {
            return Err(FileOperationError::AlreadyExists(archive));
        }

        let mut cmd = Command::new(&self.tar_command);
        cmd.arg("-cf").arg(&archive).arg("-C").arg(parent).arg(name);
        let output = run_streaming(cmd, Echo::Debug).await?;
        if !output.success() {
            return Err(FileOperationError::TarFailed {
                path: dpath.to_path_buf(),
                code: Some(output.exit_code),
                stderr: output.diagnostic(),
            });
        }

        let check_path = archive.clone();
        let verified = tokio::task::spawn_blocking(move || verify_archive(&check_path))
            .await
            .map_err(std::io::Error::other)?;

        match verified {
            Ok(n_entries) => {
                tokio::fs::remove_dir_all(dpath).await?;
                info!(
                    "Archived {} into {} ({} entries)",
                    dpath.display(),
                    archive.display(),
                    n_entries
                );
                Ok(ArchiveOutcome::Archived(archive))
            }
            Err(reason) => {
                error!(
                    "Archive {} failed verification ({}); keeping {}",
                    archive.display(),
                    reason,
                    dpath.display()
                );
                Ok(ArchiveOutcome::SourceKept { archive, reason })
            }
        }
    }
}

/// Archives `dpath` with the system `tar`. See [`Archiver::tar_and_remove`].
pub async fn tar_and_remove(dpath: &Path) -> Result<ArchiveOutcome, FileOperationError> {
    Archiver::new().tar_and_remove(dpath).await
}

/// Path of the archive that [`tar_and_remove`] creates for `dpath`.
pub fn tar_path(dpath: &Path) -> PathBuf {
    let mut name = dpath.as_os_str().to_os_string();
    name.push(".tar");
    PathBuf::from(name)
}

/// Lists the entry paths stored in a tar archive, using `/` separators and
/// no trailing slash on directories.
pub fn list_archive_entries(archive: &Path) -> std::io::Result<Vec<String>> {
    let mut reader = tar::Archive::new(File::open(archive)?);
    let mut entries = Vec::new();
    for entry in reader.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let normalized = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !normalized.is_empty() && normalized != "." {
            entries.push(normalized);
        }
    }
    Ok(entries)
}

fn verify_archive(archive: &Path) -> Result<usize, String> {
    if !archive.is_file() {
        return Err("archive file does not exist".to_string());
    }
    let entries = list_archive_entries(archive).map_err(|e| e.to_string())?;
    if entries.is_empty() {
        return Err("archive has no entries".to_string());
    }
    Ok(entries.len())
}
