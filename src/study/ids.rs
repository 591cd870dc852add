//! Participant and session identifiers.
//!
//! Identifiers are stored in canonical form: the BIDS entity prefix
//! (`sub-` / `ses-`) is stripped and the remainder must be alphanumeric.
//! Equality and hashing therefore ignore whether the caller passed
//! `sub-01` or `01`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// BIDS prefix for participant identifiers.
pub const PARTICIPANT_PREFIX: &str = "sub-";
/// BIDS prefix for session identifiers.
pub const SESSION_PREFIX: &str = "ses-";

fn canonicalize(raw: &str, prefix: &str) -> Option<String> {
    let stripped = raw.trim().strip_prefix(prefix).unwrap_or(raw.trim());
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(stripped.to_string())
    } else {
        None
    }
}

/// A canonical participant identifier (no `sub-` prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Parses and canonicalizes a participant identifier.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        canonicalize(raw, PARTICIPANT_PREFIX)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidParticipantId(raw.to_string()))
    }

    /// Returns the canonical form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the BIDS form (`sub-<id>`).
    pub fn bids(&self) -> String {
        format!("{PARTICIPANT_PREFIX}{}", self.0)
    }
}

/// A canonical session identifier (no `ses-` prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Parses and canonicalizes a session identifier.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        canonicalize(raw, SESSION_PREFIX)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidSessionId(raw.to_string()))
    }

    /// Returns the canonical form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the BIDS form (`ses-<id>`).
    pub fn bids(&self) -> String {
        format!("{SESSION_PREFIX}{}", self.0)
    }
}

macro_rules! impl_id_conversions {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

impl_id_conversions!(ParticipantId);
impl_id_conversions!(SessionId);

/// A participant/session pair, the unit of work for every workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantSessionKey {
    pub participant_id: ParticipantId,
    pub session_id: SessionId,
}

impl ParticipantSessionKey {
    /// Creates a key from already-validated identifiers.
    pub fn new(participant_id: ParticipantId, session_id: SessionId) -> Self {
        Self {
            participant_id,
            session_id,
        }
    }

    /// Parses both identifiers from raw strings.
    pub fn parse(participant_id: &str, session_id: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(
            ParticipantId::new(participant_id)?,
            SessionId::new(session_id)?,
        ))
    }

    /// Returns true if the key passes the optional participant/session filters.
    pub fn matches(
        &self,
        participant_id: Option<&ParticipantId>,
        session_id: Option<&SessionId>,
    ) -> bool {
        participant_id.map_or(true, |p| *p == self.participant_id)
            && session_id.map_or(true, |s| *s == self.session_id)
    }
}

impl fmt::Display for ParticipantSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.participant_id.bids(),
            self.session_id.bids()
        )
    }
}
