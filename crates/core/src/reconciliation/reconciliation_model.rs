use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Consistent,
    Missing,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEntry {
    pub visit_instance_id: String,
    pub form_assignment_id: String,
    pub classification: Classification,
    pub form_instance_id: Option<String>,
    /// Set when the current version could not be resolved or built.
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub subject_id: String,
    pub entries: Vec<ReconciliationEntry>,
}

impl ReconciliationReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.entries
            .iter()
            .filter(|e| e.classification == classification)
            .count()
    }

    pub fn is_consistent(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.classification == Classification::Consistent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairError {
    pub visit_instance_id: String,
    pub form_assignment_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub repaired_count: usize,
    pub errors: Vec<RepairError>,
}

/// Version an assignment currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version_id: String,
    pub field_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotState {
    pub snapshot_id: String,
    pub version_id: String,
    pub field_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub form_instance_id: String,
    pub snapshot: Option<SnapshotState>,
}

/// One applicable assignment of a visit instance and what exists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedForm {
    pub form_assignment_id: String,
    pub resolved_version: Option<ResolvedVersion>,
    pub instance: Option<InstanceState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitFormState {
    pub visit_instance_id: String,
    pub forms: Vec<ExpectedForm>,
}

/// Everything needed to classify one subject, loaded in a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFormState {
    pub subject_id: String,
    pub visits: Vec<VisitFormState>,
}
