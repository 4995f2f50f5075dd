use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use edc_core::reconciliation::{ReconciliationService, ReconciliationServiceTrait};
use edc_core::snapshots::SnapshotRepositoryTrait;
use edc_storage_sqlite::{
    create_pool, run_migrations, spawn_writer, ReconciliationRepository, SnapshotRepository,
};

/// Services the maintenance commands run against, wired over one pool and
/// one writer.
pub struct ServiceContext {
    pub actor: String,
    pub snapshot_repository: Arc<dyn SnapshotRepositoryTrait>,
    pub reconciliation_service: Arc<dyn ReconciliationServiceTrait>,
}

impl ServiceContext {
    pub fn initialize(database: &str, actor: String) -> Result<Self> {
        run_migrations(database)
            .with_context(|| format!("failed to migrate database at {}", database))?;
        let pool = create_pool(database)
            .with_context(|| format!("failed to open database at {}", database))?;
        let writer = spawn_writer(pool.as_ref().clone());
        debug!("Connected to {}", database);

        let snapshot_repository: Arc<dyn SnapshotRepositoryTrait> =
            Arc::new(SnapshotRepository::new(pool.clone(), writer.clone()));
        let reconciliation_repository = Arc::new(ReconciliationRepository::new(pool, writer));
        let reconciliation_service = Arc::new(ReconciliationService::new(
            reconciliation_repository,
            snapshot_repository.clone(),
        ));

        Ok(Self {
            actor,
            snapshot_repository,
            reconciliation_service,
        })
    }
}
