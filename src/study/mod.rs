//! Study dataset primitives: participant/session identifiers, pipeline
//! identities, and the directory layout every workflow resolves its paths
//! against.

pub mod identity;
pub mod ids;
pub mod layout;

pub use identity::PipelineIdentity;
pub use ids::{ParticipantId, ParticipantSessionKey, SessionId};
pub use layout::{DatasetLayout, GLOBAL_CONFIG_FILE, PIPELINE_CONFIG_FILE};
