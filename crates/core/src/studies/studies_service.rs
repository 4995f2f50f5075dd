use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::studies_model::{StudyDefinition, StudyDefinitionInput, VisitRemoval};
use super::studies_traits::{StudyRepositoryTrait, StudyServiceTrait};
use super::sync_model::{StudySyncRequest, StudyWriteResult};
use crate::errors::{Error, Result, ValidationError};

pub struct StudyService {
    repository: Arc<dyn StudyRepositoryTrait>,
}

impl StudyService {
    pub fn new(repository: Arc<dyn StudyRepositoryTrait>) -> Self {
        Self { repository }
    }

    fn validate(definition: &StudyDefinitionInput, actor: &str) -> Result<()> {
        if actor.trim().is_empty() {
            return Err(ValidationError::MissingField("actor").into());
        }
        if definition.unique_identifier.trim().is_empty() {
            return Err(ValidationError::MissingField("uniqueIdentifier").into());
        }
        if definition.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name").into());
        }
        Ok(())
    }
}

#[async_trait]
impl StudyServiceTrait for StudyService {
    async fn synchronize_study(
        &self,
        definition: StudyDefinitionInput,
        actor: &str,
    ) -> Result<StudyWriteResult> {
        Self::validate(&definition, actor)?;

        let identifier = definition.unique_identifier.clone();
        let request = StudySyncRequest::new(definition, actor);
        debug!(
            "Synchronizing study '{}' with {} canonical parameter(s)",
            identifier,
            request.parameters.len()
        );

        match self.repository.synchronize_study(request).await {
            Ok(outcome) => {
                if outcome.warnings.is_empty() {
                    info!("{}", outcome.message());
                } else {
                    warn!("{}", outcome.message());
                }
                Ok(StudyWriteResult::from(outcome))
            }
            Err(err @ (Error::IdentityConflict(_) | Error::ImmutableIdentifier { .. })) => {
                warn!("Study '{}' rejected: {}", identifier, err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn get_study_definition(&self, study_id: &str) -> Result<Option<StudyDefinition>> {
        self.repository.get_study_definition(study_id)
    }

    async fn remove_visit_definition(
        &self,
        visit_definition_id: &str,
        actor: &str,
    ) -> Result<VisitRemoval> {
        if actor.trim().is_empty() {
            return Err(ValidationError::MissingField("actor").into());
        }
        self.repository
            .remove_visit_definition(visit_definition_id.to_string(), actor.to_string())
            .await
    }
}
