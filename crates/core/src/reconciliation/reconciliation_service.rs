use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::reconciler::classify_subject_forms;
use super::reconciliation_model::{Classification, ReconciliationReport, RepairOutcome};
use super::reconciliation_traits::{ReconciliationRepositoryTrait, ReconciliationServiceTrait};
use crate::errors::{Result, ValidationError};
use crate::snapshots::{RebuildSummary, SnapshotRepositoryTrait};

/// Stateless: each call reads what it needs, so it can back a per-request
/// endpoint or a periodic sweep alike.
pub struct ReconciliationService {
    repository: Arc<dyn ReconciliationRepositoryTrait>,
    snapshot_repository: Arc<dyn SnapshotRepositoryTrait>,
}

impl ReconciliationService {
    pub fn new(
        repository: Arc<dyn ReconciliationRepositoryTrait>,
        snapshot_repository: Arc<dyn SnapshotRepositoryTrait>,
    ) -> Self {
        Self {
            repository,
            snapshot_repository,
        }
    }
}

fn require_actor(actor: &str) -> Result<()> {
    if actor.trim().is_empty() {
        return Err(ValidationError::MissingField("actor").into());
    }
    Ok(())
}

#[async_trait]
impl ReconciliationServiceTrait for ReconciliationService {
    fn verify_form_integrity(&self, subject_id: &str) -> Result<Option<ReconciliationReport>> {
        let Some(state) = self.repository.load_subject_form_state(subject_id)? else {
            debug!("verify_form_integrity: subject '{}' not found", subject_id);
            return Ok(None);
        };
        let report = classify_subject_forms(&state);
        let stale = report.count(Classification::Stale);
        if stale > 0 {
            warn!(
                "Subject '{}' has {} stale snapshot(s); refresh requires explicit confirmation",
                subject_id, stale
            );
        }
        debug!(
            "Subject '{}': {} consistent, {} missing, {} stale",
            subject_id,
            report.count(Classification::Consistent),
            report.count(Classification::Missing),
            stale
        );
        Ok(Some(report))
    }

    async fn repair_missing_snapshots(
        &self,
        subject_id: &str,
        actor: &str,
    ) -> Result<Option<RepairOutcome>> {
        require_actor(actor)?;
        let outcome = self
            .repository
            .repair_missing_snapshots(subject_id.to_string(), actor.to_string())
            .await?;
        if let Some(outcome) = &outcome {
            info!(
                "Repaired {} snapshot(s) for subject '{}' ({} error(s))",
                outcome.repaired_count,
                subject_id,
                outcome.errors.len()
            );
        }
        Ok(outcome)
    }

    async fn rebuild_all_snapshots(&self, actor: &str) -> Result<RebuildSummary> {
        require_actor(actor)?;
        self.snapshot_repository
            .rebuild_all_snapshots(actor.to_string())
            .await
    }
}
