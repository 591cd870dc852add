//! Turns a resolved container configuration into an executable command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContainerError;

use super::config::{ContainerConfig, DEFAULT_SUBCOMMAND};

/// Container engine flavour, inferred from the configured command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEngine {
    Apptainer,
    Singularity,
    Docker,
    Other,
}

impl ContainerEngine {
    /// Infers the engine from the basename of the command.
    pub fn from_command(command: &str) -> Self {
        let name = Path::new(command)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match name.as_str() {
            "apptainer" => ContainerEngine::Apptainer,
            "singularity" => ContainerEngine::Singularity,
            "docker" | "podman" => ContainerEngine::Docker,
            _ => ContainerEngine::Other,
        }
    }

    fn bind_flag(&self) -> &'static str {
        match self {
            ContainerEngine::Docker => "--volume",
            _ => "--bind",
        }
    }

    /// Prefix the engine expects on host variables forwarded into the container.
    fn env_prefix(&self) -> Option<&'static str> {
        match self {
            ContainerEngine::Apptainer => Some("APPTAINERENV_"),
            ContainerEngine::Singularity => Some("SINGULARITYENV_"),
            ContainerEngine::Docker | ContainerEngine::Other => None,
        }
    }
}

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Rw,
    Ro,
}

/// A host path made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPath {
    pub local: PathBuf,
    /// Path inside the container; same as `local` when unset.
    pub inside: Option<PathBuf>,
    pub mode: BindMode,
}

impl BindPath {
    /// Creates a read-write bind of `local` onto the same path inside.
    pub fn new(local: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            inside: None,
            mode: BindMode::Rw,
        }
    }

    /// Creates a read-only bind of `local` onto the same path inside.
    pub fn readonly(local: impl Into<PathBuf>) -> Self {
        Self {
            mode: BindMode::Ro,
            ..Self::new(local)
        }
    }

    fn to_spec(&self, local: &Path) -> String {
        let inside = self.inside.as_deref().unwrap_or(local);
        let mode = match self.mode {
            BindMode::Rw => "",
            BindMode::Ro => ":ro",
        };
        format!("{}:{}{}", local.display(), inside.display(), mode)
    }
}

/// A fully prepared container invocation prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    pub program: String,
    pub subcommand: String,
    pub args: Vec<String>,
    /// Environment overlay for the spawned process. Never applied to this process.
    pub env: BTreeMap<String, String>,
}

impl ContainerCommand {
    /// Renders `{command} {subcommand} {args...}` with shell quoting where needed.
    pub fn to_command_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(std::iter::once(self.subcommand.as_str()))
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds a [`ContainerCommand`] from a resolved config.
#[derive(Debug, Clone)]
pub struct ContainerCommandBuilder {
    config: ContainerConfig,
    subcommand: String,
    binds: Vec<BindPath>,
    check_executable: bool,
    create_missing: bool,
}

impl ContainerCommandBuilder {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            subcommand: DEFAULT_SUBCOMMAND.to_string(),
            binds: Vec::new(),
            check_executable: true,
            create_missing: true,
        }
    }

    pub fn with_subcommand(mut self, subcommand: impl Into<String>) -> Self {
        self.subcommand = subcommand.into();
        self
    }

    pub fn with_bind(mut self, bind: BindPath) -> Self {
        self.binds.push(bind);
        self
    }

    pub fn with_binds(mut self, binds: impl IntoIterator<Item = BindPath>) -> Self {
        self.binds.extend(binds);
        self
    }

    /// Skips the PATH lookup of the engine executable.
    pub fn without_executable_check(mut self) -> Self {
        self.check_executable = false;
        self
    }

    /// Leaves missing host directories alone instead of creating them.
    pub fn without_creating_binds(mut self) -> Self {
        self.create_missing = false;
        self
    }

    pub fn build(self) -> Result<ContainerCommand, ContainerError> {
        let program = self
            .config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ContainerError::MissingCommand)?;

        if self.check_executable {
            ensure_executable(&program)?;
        }

        let engine = ContainerEngine::from_command(&program);
        let mut args = self.config.args.clone();
        let mut env = BTreeMap::new();

        for bind in &self.binds {
            let local = absolute(&bind.local).map_err(|source| ContainerError::BindPath {
                path: bind.local.clone(),
                source,
            })?;
            if self.create_missing && !local.exists() {
                debug!("Creating missing bind path {}", local.display());
                std::fs::create_dir_all(&local).map_err(|source| ContainerError::BindPath {
                    path: local.clone(),
                    source,
                })?;
            }
            args.push(engine.bind_flag().to_string());
            args.push(bind.to_spec(&local));
        }

        for (key, value) in &self.config.env_vars {
            match engine.env_prefix() {
                Some(prefix) => {
                    env.insert(format!("{prefix}{key}"), value.clone());
                }
                None if engine == ContainerEngine::Docker => {
                    args.push("--env".to_string());
                    args.push(format!("{key}={value}"));
                }
                None => {
                    env.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(ContainerCommand {
            program,
            subcommand: self.subcommand,
            args,
            env,
        })
    }
}

/// Fails with [`ContainerError::CommandNotFound`] unless `program` resolves to an executable.
pub fn ensure_executable(program: &str) -> Result<PathBuf, ContainerError> {
    find_executable(program).ok_or_else(|| ContainerError::CommandNotFound(program.to_string()))
}

/// Looks `program` up on `PATH`; paths containing a separator are checked directly.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Quotes a word for a POSIX shell when it contains anything unsafe.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
