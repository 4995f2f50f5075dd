mod model;
mod repository;

pub use repository::{write_audit, AuditRepository};
