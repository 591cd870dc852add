//! Tabular status stores.
//!
//! Two tables drive every workflow:
//! - [`StatusTable`]: per-pipeline processing outcomes, written by the runner
//!   and the tracker.
//! - [`CurationTable`]: upstream readiness (reorganized, converted to BIDS).
//!
//! Both are plain TSV files, saved atomically.

pub mod curation_status;
pub mod processing_status;
pub(crate) mod tsv;

pub use curation_status::{CurationRecord, CurationStage, CurationTable};
pub use processing_status::{ProcessingStatus, StatusRecord, StatusTable};
