mod reconciler;
mod reconciliation_model;
mod reconciliation_service;
mod reconciliation_traits;

pub use reconciler::classify_subject_forms;
pub use reconciliation_model::*;
pub use reconciliation_service::ReconciliationService;
pub use reconciliation_traits::{ReconciliationRepositoryTrait, ReconciliationServiceTrait};
