//! Domain layer for the study definition synchronizer and the form
//! snapshot consistency engine. Storage lives behind the repository traits.

pub mod audit;
pub mod errors;
pub mod parameters;
pub mod reconciliation;
pub mod snapshots;
pub mod studies;
pub mod subjects;
pub mod templates;

pub use errors::{Error, Result};
