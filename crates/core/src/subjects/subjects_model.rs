use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    #[default]
    Available,
    Signed,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    #[default]
    Scheduled,
    DataEntryStarted,
    Completed,
    Stopped,
    Skipped,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    #[default]
    InitialDataEntry,
    DataEntryComplete,
    Signed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub study_id: String,
    pub label: String,
    pub secondary_label: Option<String>,
    pub person_id: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub site_id: Option<String>,
    pub status: SubjectStatus,
    pub enrolled_at: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub study_id: String,
    pub label: String,
    pub secondary_label: Option<String>,
    pub person_id: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub site_id: Option<String>,
}

/// An occurrence of a visit definition for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitInstance {
    pub id: String,
    pub subject_id: String,
    pub visit_definition_id: String,
    /// 1-based; greater than 1 only for repeating definitions.
    pub occurrence: i32,
    pub status: VisitStatus,
    pub scheduled_at: Option<String>,
    pub location: Option<String>,
    pub created_at: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleVisit {
    pub subject_id: String,
    pub visit_definition_id: String,
    pub scheduled_at: Option<String>,
    pub location: Option<String>,
}

/// A filled (or fillable) copy of a form assignment within a visit instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInstance {
    pub id: String,
    pub visit_instance_id: String,
    pub form_assignment_id: String,
    pub status: FormStatus,
    pub interviewer_name: Option<String>,
    pub interview_date: Option<String>,
    pub created_at: String,
    pub created_by: String,
}
