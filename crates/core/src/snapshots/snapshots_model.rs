use serde::{Deserialize, Serialize};

use crate::templates::{FieldOption, FieldType};

/// One field as frozen into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotField {
    pub field_id: String,
    pub name: String,
    pub label: Option<String>,
    pub field_type: FieldType,
    pub required: bool,
    pub options: Option<Vec<FieldOption>>,
    pub ordinal: i32,
    pub section: Option<String>,
}

/// Ordered field list of one template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldList {
    pub version_id: String,
    pub fields: Vec<SnapshotField>,
}

impl FieldList {
    pub fn field_count(&self) -> i32 {
        i32::try_from(self.fields.len()).unwrap_or(i32::MAX)
    }
}

/// Persisted copy of a version's field list for one form instance, plus the
/// answers entered against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub id: String,
    pub form_instance_id: String,
    pub version_id: String,
    pub field_count: i32,
    pub fields: Vec<SnapshotField>,
    pub answers: serde_json::Value,
    pub captured_at: String,
    pub captured_by: String,
}

/// Result of the bulk rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildSummary {
    pub discarded: i64,
    pub rebuilt: i64,
    /// Snapshots of removed instances, visits or assignments, left as is.
    pub retained: i64,
    pub failures: Vec<RebuildFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildFailure {
    pub form_instance_id: String,
    pub message: String,
}

/// Per-subject form instance and snapshot counts, for before/after
/// comparison around a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSnapshotCount {
    pub subject_id: String,
    pub label: String,
    pub form_instances: i64,
    pub snapshots: i64,
}
