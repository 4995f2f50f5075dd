//! Append-only audit trail models.

mod audit_model;
mod audit_traits;

pub use audit_model::*;
pub use audit_traits::*;
