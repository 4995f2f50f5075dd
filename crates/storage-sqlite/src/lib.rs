//! SQLite storage for the study-definition and form-snapshot engine.
//!
//! Reads go through the shared connection pool; every mutation is funneled
//! through the single writer thread in [`db::write_actor`].

pub mod audit;
pub mod db;
pub mod errors;
pub mod reconciliation;
pub mod schema;
pub mod snapshots;
pub mod studies;
pub mod subjects;
pub mod templates;

#[cfg(test)]
mod test_support;

pub use audit::AuditRepository;
pub use db::{create_pool, get_connection, init, run_migrations, write_actor::spawn_writer};
pub use db::{DbPool, WriteHandle};
pub use errors::StorageError;
pub use reconciliation::ReconciliationRepository;
pub use snapshots::SnapshotRepository;
pub use studies::StudyRepository;
pub use subjects::SubjectRepository;
pub use templates::FormTemplateRepository;
