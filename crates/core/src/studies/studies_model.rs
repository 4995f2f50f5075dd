use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    #[default]
    Active,
    Archived,
}

/// Status of template rows nested under a study. Rows with dependent
/// instances are never deleted, only flagged `Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Active,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    #[default]
    Scheduled,
    Unscheduled,
    Common,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupClassType {
    #[default]
    Arm,
    Family,
    Demographic,
    Other,
}

/// Whether every subject must be placed in a group of the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectAssignment {
    Required,
    #[default]
    Optional,
}

/// Root of a study's definition graph as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDefinition {
    pub id: String,
    pub unique_identifier: String,
    pub name: String,
    pub summary: Option<String>,
    pub principal_investigator: Option<String>,
    pub sponsor: Option<String>,
    pub status: StudyStatus,
    pub owner: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub visit_definitions: Vec<VisitDefinition>,
    pub group_classes: Vec<GroupClass>,
    pub sites: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDefinition {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub description: Option<String>,
    pub ordinal: i32,
    pub repeating: bool,
    pub visit_type: VisitType,
    pub category: Option<String>,
    pub target_day: Option<i32>,
    pub earliest_day: Option<i32>,
    pub latest_day: Option<i32>,
    pub status: RecordStatus,
    pub form_assignments: Vec<FormAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAssignment {
    pub id: String,
    pub visit_definition_id: String,
    pub form_template_id: String,
    pub default_version_id: String,
    pub required: bool,
    pub double_entry: bool,
    pub electronic_signature: bool,
    pub ordinal: i32,
    pub status: RecordStatus,
    /// Present only when the schema carries the extended assignment columns.
    pub extras: Option<FormAssignmentExtras>,
}

/// Assignment settings stored in columns that older schemas lack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAssignmentExtras {
    pub hide_form: bool,
    pub sdv_code: Option<String>,
    pub participant_form: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupClass {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub class_type: GroupClassType,
    pub subject_assignment: SubjectAssignment,
    pub status: RecordStatus,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub group_class_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub study_id: String,
    pub unique_identifier: String,
    pub name: String,
    pub principal_investigator: Option<String>,
    pub expected_enrollment: Option<i32>,
    pub status: RecordStatus,
}

// ─────────────────────────────────────────────────────────────────────────────
// Write inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Create/update request for a whole definition graph. `id` selects the
/// update path; nested records with an `id` are updated in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDefinitionInput {
    pub id: Option<String>,
    pub unique_identifier: String,
    pub name: String,
    pub summary: Option<String>,
    pub principal_investigator: Option<String>,
    pub sponsor: Option<String>,
    pub status: Option<StudyStatus>,
    /// Raw caller parameters, any spelling.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub visit_definitions: Vec<VisitDefinitionInput>,
    #[serde(default)]
    pub group_classes: Vec<GroupClassInput>,
    #[serde(default)]
    pub sites: Vec<SiteInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDefinitionInput {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub ordinal: i32,
    pub repeating: bool,
    #[serde(default)]
    pub visit_type: VisitType,
    pub category: Option<String>,
    pub target_day: Option<i32>,
    pub earliest_day: Option<i32>,
    pub latest_day: Option<i32>,
    #[serde(default)]
    pub form_assignments: Vec<FormAssignmentInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAssignmentInput {
    pub id: Option<String>,
    pub form_template_id: String,
    /// Resolved to the highest active version when omitted.
    pub default_version_id: Option<String>,
    pub required: bool,
    pub double_entry: bool,
    pub electronic_signature: bool,
    pub ordinal: i32,
    pub hide_form: Option<bool>,
    pub sdv_code: Option<String>,
    pub participant_form: Option<bool>,
}

impl FormAssignmentInput {
    pub fn has_extras(&self) -> bool {
        self.hide_form.is_some() || self.sdv_code.is_some() || self.participant_form.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupClassInput {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub class_type: GroupClassType,
    #[serde(default)]
    pub subject_assignment: SubjectAssignment,
    #[serde(default)]
    pub groups: Vec<GroupInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInput {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInput {
    pub id: Option<String>,
    pub unique_identifier: String,
    pub name: String,
    pub principal_investigator: Option<String>,
    pub expected_enrollment: Option<i32>,
}

/// Outcome of removing a visit definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitRemoval {
    /// No instances referenced it; the row and its assignments are gone.
    Deleted,
    /// Instances exist; the row is kept with status `removed`.
    FlaggedRemoved,
}
