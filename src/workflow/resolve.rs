//! Resolution of the pipeline version and step a workflow runs.
//!
//! Installed versions are discovered from bundle directory names
//! (`<name>-<version>`) and compared as semantic versions. Version strings
//! are parsed leniently: a leading `v` is dropped and a missing minor or
//! patch component counts as `0`. Any parsable version outranks every
//! unparsable one; unparsable versions fall back to lexicographic order.

use std::cmp::Ordering;
use std::path::Path;

use semver::Version;
use tracing::debug;

use crate::config::{PipelineConfig, PipelineType, StepConfig};
use crate::error::WorkflowError;
use crate::study::{DatasetLayout, PIPELINE_CONFIG_FILE};

/// Parses a version string leniently. Returns `None` if it is not
/// recognizably a semantic version.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(version) = Version::parse(stripped) {
        return Some(version);
    }

    let core_end = stripped.find(['-', '+']).unwrap_or(stripped.len());
    let (core, suffix) = stripped.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if parts.is_empty() || parts.len() > 3 || !numeric {
        return None;
    }

    let mut padded = parts.clone();
    padded.resize(3, "0");
    Version::parse(&format!("{}{}", padded.join("."), suffix)).ok()
}

/// Orders two version strings under the lenient semantic policy.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Picks the newest version.
///
/// Fails when two distinct strings normalize to the same semantic version,
/// e.g. `1.0` and `1.0.0`, since either could be meant.
pub fn latest_version(name: &str, versions: &[String]) -> Result<Option<String>, WorkflowError> {
    for (i, a) in versions.iter().enumerate() {
        let Some(va) = parse_version(a) else { continue };
        let clashes: Vec<String> = versions[i + 1..]
            .iter()
            .filter(|b| parse_version(b).as_ref() == Some(&va))
            .cloned()
            .collect();
        if !clashes.is_empty() {
            let mut all = vec![a.clone()];
            all.extend(clashes);
            return Err(WorkflowError::AmbiguousVersion {
                name: name.to_string(),
                versions: all,
            });
        }
    }

    Ok(versions
        .iter()
        .max_by(|a, b| compare_versions(a, b))
        .cloned())
}

/// Lists installed versions of `name` in a bundle store.
///
/// A directory counts as a bundle when it is named `<name>-<version>` and
/// holds a `config.json`.
pub fn installed_versions(store: &Path, name: &str) -> std::io::Result<Vec<String>> {
    if !store.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{name}-");
    let mut versions = Vec::new();
    for entry in std::fs::read_dir(store)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().to_string();
        if let Some(version) = dir_name.strip_prefix(&prefix) {
            if !version.is_empty() && entry.path().join(PIPELINE_CONFIG_FILE).is_file() {
                versions.push(version.to_string());
            }
        }
    }
    versions.sort();
    Ok(versions)
}

/// Returns the requested version if installed, or the newest installed one.
pub fn resolve_version(
    layout: &DatasetLayout,
    pipeline_type: PipelineType,
    name: &str,
    requested: Option<&str>,
) -> Result<String, WorkflowError> {
    let store = layout.pipeline_store(pipeline_type);
    let installed = installed_versions(&store, name)?;

    if let Some(version) = requested {
        if installed.iter().any(|v| v == version) {
            return Ok(version.to_string());
        }
        if installed.is_empty() {
            return Err(WorkflowError::PipelineNotInstalled {
                name: name.to_string(),
                dpath: store,
            });
        }
        return Err(WorkflowError::VersionNotInstalled {
            name: name.to_string(),
            version: version.to_string(),
        });
    }

    let latest = latest_version(name, &installed)?.ok_or_else(|| WorkflowError::PipelineNotInstalled {
        name: name.to_string(),
        dpath: store,
    })?;
    debug!("Resolved {} version to {} (installed: {:?})", name, latest, installed);
    Ok(latest)
}

/// Selects the step to run: the requested one, or the only one.
pub fn resolve_step<'a>(config: &'a PipelineConfig, requested: Option<&str>) -> Result<&'a StepConfig, WorkflowError> {
    match requested {
        Some(step) => config.step(step).ok_or_else(|| WorkflowError::StepNotFound {
            name: config.name.clone(),
            step: step.to_string(),
        }),
        None if config.steps.len() == 1 => Ok(&config.steps[0]),
        None => Err(WorkflowError::AmbiguousStep {
            name: config.name.clone(),
            count: config.steps.len(),
            steps: config.step_names(),
        }),
    }
}
