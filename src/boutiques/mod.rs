//! Descriptor/invocation launching.
//!
//! A pipeline step is a pair of JSON documents: a descriptor (the job
//! template) and an invocation (its parameter values). Both are rendered
//! through the template engine, validated by a [`BoutiquesBackend`], and
//! then executed or simulated. The backend is opaque; the default one
//! shells out to the `bosh` CLI.

mod bosh;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::BoutiquesError;
use crate::template::{substitute, TemplateBindings};

pub use bosh::BoshCli;

/// Whether a run performs real work or only a structural dry execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Launch,
    Simulate,
}

impl ExecMode {
    pub fn from_simulate(simulate: bool) -> Self {
        if simulate {
            ExecMode::Simulate
        } else {
            ExecMode::Launch
        }
    }
}

/// External engine that validates and executes descriptor/invocation pairs.
#[async_trait]
pub trait BoutiquesBackend: Send + Sync {
    /// Validates a rendered descriptor; fails with [`BoutiquesError::DescriptorInvalid`].
    async fn validate_descriptor(&self, descriptor: &Value) -> Result<(), BoutiquesError>;

    /// Validates a rendered invocation against its descriptor; fails with
    /// [`BoutiquesError::InvocationInvalid`].
    async fn validate_invocation(&self, descriptor: &Value, invocation: &Value) -> Result<(), BoutiquesError>;

    /// Executes (or simulates) the pair and returns the process exit code.
    ///
    /// `env` is an overlay applied to the spawned process only.
    async fn execute(
        &self,
        descriptor: &Value,
        invocation: &Value,
        mode: ExecMode,
        env: &BTreeMap<String, String>,
    ) -> Result<i32, BoutiquesError>;
}

/// Renders both documents with `bindings`, failing on any unresolved placeholder.
pub fn render(
    descriptor: &Value,
    invocation: &Value,
    bindings: &TemplateBindings,
) -> Result<(Value, Value), BoutiquesError> {
    Ok((substitute(descriptor, bindings)?, substitute(invocation, bindings)?))
}

/// Renders, validates, and runs one descriptor/invocation pair.
///
/// Returns the rendered descriptor and invocation as JSON strings. A
/// non-zero exit code becomes [`BoutiquesError::PipelineExecution`]; no
/// step is retried.
pub async fn launch(
    backend: &dyn BoutiquesBackend,
    descriptor: &Value,
    invocation: &Value,
    bindings: &TemplateBindings,
    mode: ExecMode,
    env: &BTreeMap<String, String>,
) -> Result<(String, String), BoutiquesError> {
    let (descriptor, invocation) = render(descriptor, invocation, bindings)?;
    let descriptor_str = serde_json::to_string_pretty(&descriptor)?;
    let invocation_str = serde_json::to_string_pretty(&invocation)?;
    debug!("Rendered descriptor:\n{}", descriptor_str);
    info!("Rendered invocation:\n{}", invocation_str);

    backend.validate_descriptor(&descriptor).await?;
    backend.validate_invocation(&descriptor, &invocation).await?;

    let exit_code = backend.execute(&descriptor, &invocation, mode, env).await?;
    if exit_code != 0 {
        return Err(BoutiquesError::PipelineExecution { exit_code });
    }

    Ok((descriptor_str, invocation_str))
}
