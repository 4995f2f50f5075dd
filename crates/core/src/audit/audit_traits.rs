use crate::audit::{AuditEntity, AuditEntry};
use crate::errors::Result;

/// Read access to the audit trail. Appends happen inside the writer's
/// transactions and are not exposed here.
pub trait AuditRepositoryTrait: Send + Sync {
    fn list_audit_entries(&self, entity: AuditEntity, entity_id: &str) -> Result<Vec<AuditEntry>>;
}
