use async_trait::async_trait;

use super::reconciliation_model::{ReconciliationReport, RepairOutcome, SubjectFormState};
use crate::errors::Result;
use crate::snapshots::RebuildSummary;

#[async_trait]
pub trait ReconciliationRepositoryTrait: Send + Sync {
    /// `None` when the subject does not exist.
    fn load_subject_form_state(&self, subject_id: &str) -> Result<Option<SubjectFormState>>;

    /// Creates instances and snapshots for every `missing` pair. Each pair
    /// is written under its own savepoint.
    async fn repair_missing_snapshots(
        &self,
        subject_id: String,
        actor: String,
    ) -> Result<Option<RepairOutcome>>;
}

#[async_trait]
pub trait ReconciliationServiceTrait: Send + Sync {
    fn verify_form_integrity(&self, subject_id: &str) -> Result<Option<ReconciliationReport>>;

    async fn repair_missing_snapshots(
        &self,
        subject_id: &str,
        actor: &str,
    ) -> Result<Option<RepairOutcome>>;

    async fn rebuild_all_snapshots(&self, actor: &str) -> Result<RebuildSummary>;
}
