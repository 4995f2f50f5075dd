use async_trait::async_trait;

use super::studies_model::{StudyDefinition, StudyDefinitionInput, VisitRemoval};
use super::sync_model::{StudySyncRequest, StudyWriteResult, SyncOutcome};
use crate::errors::Result;

/// Persistence for study definition graphs.
#[async_trait]
pub trait StudyRepositoryTrait: Send + Sync {
    /// Writes the study and its nested collections in one transaction with
    /// a savepoint per nested step.
    async fn synchronize_study(&self, request: StudySyncRequest) -> Result<SyncOutcome>;

    fn get_study_definition(&self, study_id: &str) -> Result<Option<StudyDefinition>>;

    fn find_study_id_by_identifier(&self, unique_identifier: &str) -> Result<Option<String>>;

    async fn remove_visit_definition(
        &self,
        visit_definition_id: String,
        actor: String,
    ) -> Result<VisitRemoval>;
}

#[async_trait]
pub trait StudyServiceTrait: Send + Sync {
    async fn synchronize_study(
        &self,
        definition: StudyDefinitionInput,
        actor: &str,
    ) -> Result<StudyWriteResult>;

    fn get_study_definition(&self, study_id: &str) -> Result<Option<StudyDefinition>>;

    async fn remove_visit_definition(
        &self,
        visit_definition_id: &str,
        actor: &str,
    ) -> Result<VisitRemoval>;
}
