//! Types describing one synchronization of a study definition.

use serde::{Deserialize, Serialize};

use super::studies_model::StudyDefinitionInput;
use crate::parameters::{normalize_parameters, NormalizedParameters};

/// Nested collection steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Parameters,
    VisitDefinitions,
    GroupClasses,
    Sites,
    AuditLog,
}

impl SyncStep {
    pub const NESTED_ORDER: [SyncStep; 4] = [
        SyncStep::Parameters,
        SyncStep::VisitDefinitions,
        SyncStep::GroupClasses,
        SyncStep::Sites,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SyncStep::Parameters => "parameters",
            SyncStep::VisitDefinitions => "visit definitions",
            SyncStep::GroupClasses => "group classes",
            SyncStep::Sites => "sites",
            SyncStep::AuditLog => "audit log",
        }
    }

    /// Savepoint name used for this step.
    pub fn checkpoint_name(&self) -> &'static str {
        match self {
            SyncStep::Parameters => "sync_parameters",
            SyncStep::VisitDefinitions => "sync_visit_definitions",
            SyncStep::GroupClasses => "sync_group_classes",
            SyncStep::Sites => "sync_sites",
            SyncStep::AuditLog => "sync_audit_log",
        }
    }
}

/// Progress of one synchronization.
///
/// `Start -> PrimaryWritten -> Nested(step)* -> AuditLogged -> Committed`,
/// with `Failed` reachable only from `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Start,
    PrimaryWritten,
    Nested(SyncStep),
    AuditLogged,
    Committed,
    Failed,
}

impl SyncPhase {
    pub fn can_advance_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Start, PrimaryWritten) | (Start, Failed) => true,
            (PrimaryWritten, Nested(_)) | (PrimaryWritten, AuditLogged) => true,
            (Nested(current), Nested(step)) => step_index(*current) < step_index(step),
            (Nested(_), AuditLogged) => true,
            (AuditLogged, Committed) => true,
            _ => false,
        }
    }
}

fn step_index(step: SyncStep) -> usize {
    SyncStep::NESTED_ORDER
        .iter()
        .position(|s| *s == step)
        .unwrap_or(SyncStep::NESTED_ORDER.len())
}

/// A nested step that failed and was rolled back; the operation still
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWarning {
    pub step: SyncStep,
    pub message: String,
}

impl SyncWarning {
    pub fn new(step: SyncStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

/// A synchronization request whose parameters have already been
/// canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct StudySyncRequest {
    pub definition: StudyDefinitionInput,
    pub parameters: NormalizedParameters,
    pub actor: String,
}

impl StudySyncRequest {
    /// Takes the raw parameter map out of `definition` and normalizes it
    /// before anything else touches the request.
    pub fn new(mut definition: StudyDefinitionInput, actor: impl Into<String>) -> Self {
        let raw = std::mem::take(&mut definition.parameters);
        Self {
            parameters: normalize_parameters(&raw),
            definition,
            actor: actor.into(),
        }
    }

    pub fn is_update(&self) -> bool {
        self.definition
            .id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub study_id: String,
    pub created: bool,
    pub warnings: Vec<SyncWarning>,
    /// Final identifiers of the visit definitions in request order.
    pub visit_definition_ids: Vec<String>,
    pub group_class_ids: Vec<String>,
    pub site_ids: Vec<String>,
}

impl SyncOutcome {
    pub fn message(&self) -> String {
        let verb = if self.created { "created" } else { "updated" };
        if self.warnings.is_empty() {
            return format!("Study {} {}", self.study_id, verb);
        }
        let failed = self
            .warnings
            .iter()
            .map(|w| w.step.label())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Study {} {}, but {} step(s) could not be saved: {}",
            self.study_id,
            verb,
            self.warnings.len(),
            failed
        )
    }
}

/// User-visible result of a study write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyWriteResult {
    pub success: bool,
    pub message: Option<String>,
    pub study_id: String,
    pub created: bool,
    pub warnings: Vec<SyncWarning>,
}

impl From<SyncOutcome> for StudyWriteResult {
    fn from(outcome: SyncOutcome) -> Self {
        Self {
            success: true,
            message: Some(outcome.message()),
            study_id: outcome.study_id,
            created: outcome.created,
            warnings: outcome.warnings,
        }
    }
}
