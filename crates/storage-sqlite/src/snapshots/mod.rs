mod model;
mod repository;

pub(crate) use repository::{build_snapshot_tx, capture_snapshot, ensure_form_instance};
pub use repository::SnapshotRepository;
