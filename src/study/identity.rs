//! Pipeline identity: the (name, version, step) triple status is keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully resolved pipeline identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineIdentity {
    pub name: String,
    pub version: String,
    pub step: String,
}

impl PipelineIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            step: step.into(),
        }
    }
}

impl fmt::Display for PipelineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} (step: {})", self.name, self.version, self.step)
    }
}
