use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Entity types recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Study,
    StudyParameter,
    VisitDefinition,
    FormAssignment,
    GroupClass,
    Group,
    Site,
    FormTemplate,
    FormTemplateVersion,
    Subject,
    VisitInstance,
    FormInstance,
    FormSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Remove,
    Delete,
    Repair,
    Rebuild,
    Synchronize,
}

/// One audit intent, not yet appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditEntry {
    pub actor: String,
    pub occurred_at: String,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        actor: impl Into<String>,
        entity: AuditEntity,
        entity_id: impl Into<String>,
        action: AuditAction,
    ) -> Self {
        Self {
            actor: actor.into(),
            occurred_at: Utc::now().to_rfc3339(),
            entity,
            entity_id: entity_id.into(),
            action,
            old_value: None,
            new_value: None,
            reason: None,
        }
    }

    pub fn with_values(
        mut self,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub seq: i64,
    pub actor: String,
    pub occurred_at: String,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: Option<String>,
}
