//! Pipeline workflows.
//!
//! Two workflows share one orchestration skeleton:
//! - [`PipelineRunner`]: launches the pipeline for every eligible pair and
//!   records successes.
//! - [`PipelineTracker`]: inspects outputs on disk (or in archives) and
//!   records `SUCCESS`/`FAIL` for every ready pair.
//!
//! Both resolve their configuration through [`PipelineWorkflow`], compute a
//! worklist, and hand it to a [`SubmissionStrategy`] that either processes
//! pairs one after another in this process or submits them to an HPC
//! scheduler.

mod base;
pub mod resolve;
mod runner;
mod submission;
mod tracker;

use async_trait::async_trait;

use crate::error::PairFailure;
use crate::study::ParticipantSessionKey;

pub use base::{eligible_pairs, PipelineWorkflow, WorkflowOptions};
pub use runner::{PipelineRunner, RunOptions};
pub use submission::{HpcBatch, HpcCluster, LocalSequential, SubmissionStrategy};
pub use tracker::PipelineTracker;

/// Process exit status of a workflow invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// Every eligible pair succeeded, or every ready pair was already complete.
    Success = 0,
    /// Setup failed, or every attempted pair failed.
    Failure = 1,
    /// Some attempted pairs failed.
    PartialSuccess = 64,
    /// Upstream readiness yielded no pairs at all.
    NothingToRun = 65,
}

impl ReturnCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Counts describing one workflow invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Pairs the upstream stage made ready (after filters).
    pub n_ready: usize,
    /// Pairs attempted in this invocation.
    pub n_total: usize,
    /// Attempted pairs that succeeded.
    pub n_success: usize,
}

impl RunSummary {
    pub fn return_code(&self) -> ReturnCode {
        if self.n_ready == 0 {
            ReturnCode::NothingToRun
        } else if self.n_success == self.n_total {
            ReturnCode::Success
        } else if self.n_success == 0 {
            ReturnCode::Failure
        } else {
            ReturnCode::PartialSuccess
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.n_success == self.n_total
    }
}

/// Per-pair action of a workflow, driven by a [`SubmissionStrategy`].
#[async_trait]
pub trait PairWorker: Send {
    fn workflow(&self) -> &PipelineWorkflow;

    /// CLI subcommand that reproduces this workflow for a single pair.
    fn command_name(&self) -> &'static str;

    /// Workflow-specific CLI flags forwarded to per-pair jobs.
    fn forwarded_args(&self) -> Vec<String>;

    async fn process_pair(&mut self, key: &ParticipantSessionKey) -> Result<(), PairFailure>;
}
