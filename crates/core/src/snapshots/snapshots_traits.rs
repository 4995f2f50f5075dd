use async_trait::async_trait;

use super::snapshots_model::{FieldList, FormSnapshot, RebuildSummary, SubjectSnapshotCount};
use crate::errors::Result;
use crate::subjects::FormInstance;

#[async_trait]
pub trait SnapshotRepositoryTrait: Send + Sync {
    /// Reads the version's fields and builds the field list without writing.
    fn build_snapshot(&self, version_id: &str) -> Result<FieldList>;

    fn get_form_snapshot(&self, form_instance_id: &str) -> Result<Option<FormSnapshot>>;

    /// Returns the existing instance for the pair, or creates it together
    /// with its snapshot in one transaction.
    async fn open_form_instance(
        &self,
        visit_instance_id: String,
        form_assignment_id: String,
        actor: String,
    ) -> Result<FormInstance>;

    async fn record_answers(
        &self,
        form_instance_id: String,
        answers: serde_json::Value,
        actor: String,
    ) -> Result<FormSnapshot>;

    /// Rebuilds one snapshot from the assignment's current default version,
    /// keeping the answers. Always explicit and audited.
    async fn refresh_stale_snapshot(
        &self,
        form_instance_id: String,
        actor: String,
        reason: String,
    ) -> Result<FormSnapshot>;

    fn count_snapshots(&self) -> Result<i64>;

    /// Snapshots the bulk rebuild would replace.
    fn count_replaceable_snapshots(&self) -> Result<i64>;

    /// Replaces the snapshot of every eligible form instance, one savepoint
    /// per instance. A failed build keeps the previous snapshot.
    async fn rebuild_all_snapshots(&self, actor: String) -> Result<RebuildSummary>;

    fn instance_snapshot_counts(&self) -> Result<Vec<SubjectSnapshotCount>>;
}
