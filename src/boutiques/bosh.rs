//! `bosh` command-line backend.

use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::info;

use super::{BoutiquesBackend, ExecMode};
use crate::error::BoutiquesError;
use crate::process::{program_name, run_streaming, Echo, ProcessOutput};

/// Runs `bosh validate`, `bosh invocation`, and `bosh exec` as subprocesses.
///
/// Documents are written to temporary JSON files that live until the
/// subprocess returns.
#[derive(Debug, Clone)]
pub struct BoshCli {
    command: String,
}

impl BoshCli {
    pub fn new() -> Self {
        Self {
            command: "bosh".to_string(),
        }
    }

    /// Uses a different `bosh` executable.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn bosh(
        &self,
        args: &[&str],
        env: &BTreeMap<String, String>,
        echo: Echo,
    ) -> Result<ProcessOutput, BoutiquesError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(args).envs(env);
        let program = program_name(&cmd);
        run_streaming(cmd, echo)
            .await
            .map_err(|source| BoutiquesError::Spawn { program, source })
    }
}

impl Default for BoshCli {
    fn default() -> Self {
        Self::new()
    }
}

fn json_tempfile(value: &Value) -> Result<NamedTempFile, BoutiquesError> {
    let mut file = tempfile::Builder::new()
        .prefix("studyforge-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, value)?;
    file.flush()?;
    Ok(file)
}

fn path_arg(file: &NamedTempFile) -> String {
    file.path().to_string_lossy().to_string()
}

#[async_trait]
impl BoutiquesBackend for BoshCli {
    async fn validate_descriptor(&self, descriptor: &Value) -> Result<(), BoutiquesError> {
        let descriptor_file = json_tempfile(descriptor)?;
        let descriptor_path = path_arg(&descriptor_file);
        let output = self
            .bosh(&["validate", descriptor_path.as_str()], &BTreeMap::new(), Echo::Debug)
            .await?;
        if !output.success() {
            return Err(BoutiquesError::DescriptorInvalid(output.diagnostic()));
        }
        Ok(())
    }

    async fn validate_invocation(&self, descriptor: &Value, invocation: &Value) -> Result<(), BoutiquesError> {
        let descriptor_file = json_tempfile(descriptor)?;
        let invocation_file = json_tempfile(invocation)?;
        let descriptor_path = path_arg(&descriptor_file);
        let invocation_path = path_arg(&invocation_file);
        let output = self
            .bosh(
                &["invocation", descriptor_path.as_str(), "-i", invocation_path.as_str()],
                &BTreeMap::new(),
                Echo::Debug,
            )
            .await?;
        if !output.success() {
            return Err(BoutiquesError::InvocationInvalid(output.diagnostic()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        descriptor: &Value,
        invocation: &Value,
        mode: ExecMode,
        env: &BTreeMap<String, String>,
    ) -> Result<i32, BoutiquesError> {
        let descriptor_file = json_tempfile(descriptor)?;
        let invocation_file = json_tempfile(invocation)?;
        let descriptor_path = path_arg(&descriptor_file);
        let invocation_path = path_arg(&invocation_file);
        let (descriptor_path, invocation_path) = (descriptor_path.as_str(), invocation_path.as_str());

        let args: Vec<&str> = match mode {
            ExecMode::Launch => vec!["exec", "launch", "--stream", descriptor_path, invocation_path],
            ExecMode::Simulate => vec!["exec", "simulate", descriptor_path, "-i", invocation_path],
        };
        info!("Running bosh exec {:?}", mode);

        let output = self.bosh(&args, env, Echo::Info).await?;
        Ok(output.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    /// Writes an executable shell script standing in for `bosh`.
    fn fake_bosh(dir: &std::path::Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("bosh");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("failed to write script");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("failed to chmod");
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_validate_descriptor_failure_carries_output() {
        let dir = tempdir().expect("failed to create temp dir");
        let bosh = BoshCli::with_command(fake_bosh(dir.path(), "echo 'schema violation' >&2; exit 1"));
        let result = bosh.validate_descriptor(&json!({})).await;
        match result {
            Err(BoutiquesError::DescriptorInvalid(message)) => assert_eq!(message, "schema violation"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_passes_env_overlay_and_exit_code() {
        let dir = tempdir().expect("failed to create temp dir");
        let bosh = BoshCli::with_command(fake_bosh(
            dir.path(),
            "[ \"$1 $2\" = \"exec launch\" ] || exit 9\n[ \"$APPTAINERENV_FOO\" = bar ] || exit 8\nexit 0",
        ));
        let mut env = BTreeMap::new();
        env.insert("APPTAINERENV_FOO".to_string(), "bar".to_string());
        let code = bosh
            .execute(&json!({}), &json!({}), ExecMode::Launch, &env)
            .await
            .expect("fake bosh should run");
        assert_eq!(code, 0);

        let code = bosh
            .execute(&json!({}), &json!({}), ExecMode::Simulate, &env)
            .await
            .expect("fake bosh should run");
        assert_eq!(code, 9);
    }

    #[tokio::test]
    async fn test_missing_bosh_is_spawn_error() {
        let bosh = BoshCli::with_command("studyforge-missing-bosh");
        assert!(matches!(
            bosh.validate_descriptor(&json!({})).await,
            Err(BoutiquesError::Spawn { .. })
        ));
    }
}
