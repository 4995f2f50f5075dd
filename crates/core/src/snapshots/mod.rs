mod snapshot_builder;
mod snapshots_model;
mod snapshots_traits;

pub use snapshot_builder::build_field_list;
pub use snapshots_model::*;
pub use snapshots_traits::SnapshotRepositoryTrait;
