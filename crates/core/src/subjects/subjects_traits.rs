use async_trait::async_trait;

use super::subjects_model::{FormInstance, NewSubject, ScheduleVisit, Subject, VisitInstance};
use crate::errors::Result;

#[async_trait]
pub trait SubjectRepositoryTrait: Send + Sync {
    async fn enroll_subject(&self, new_subject: NewSubject, actor: String) -> Result<Subject>;

    fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>>;

    /// Creates the next occurrence of a visit. Non-repeating definitions
    /// accept a single occurrence per subject.
    async fn schedule_visit(&self, request: ScheduleVisit, actor: String)
        -> Result<VisitInstance>;

    fn list_visit_instances(&self, subject_id: &str) -> Result<Vec<VisitInstance>>;

    fn list_form_instances(&self, visit_instance_id: &str) -> Result<Vec<FormInstance>>;
}
