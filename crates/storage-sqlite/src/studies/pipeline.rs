//! Runs the nested steps of a synchronization, each under its own
//! savepoint. A failed step is rolled back and reported, never fatal.

use diesel::sqlite::SqliteConnection;
use log::{debug, error, warn};

use edc_core::audit::NewAuditEntry;
use edc_core::errors::Result;
use edc_core::studies::{SyncPhase, SyncStep, SyncWarning};

use crate::audit::write_audit;
use crate::db::savepoint;

pub(crate) struct StepPipeline {
    phase: SyncPhase,
    warnings: Vec<SyncWarning>,
}

impl StepPipeline {
    /// Starts after the primary record is written.
    pub fn after_primary_write() -> Self {
        Self {
            phase: SyncPhase::PrimaryWritten,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, next: SyncPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid sync transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!("sync phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = SyncStep> + '_ {
        self.warnings.iter().map(|w| w.step)
    }

    /// Runs `f` as `step`. Returns `None` when the step was rolled back.
    pub fn run<T, F>(&mut self, conn: &mut SqliteConnection, step: SyncStep, f: F) -> Option<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        self.advance(SyncPhase::Nested(step));
        match savepoint(conn, f) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("Sync step '{}' rolled back: {}", step.label(), err);
                self.warnings.push(SyncWarning::new(step, err.to_string()));
                None
            }
        }
    }

    /// Appends each entry under its own savepoint. Failures are logged at
    /// error level and folded into one warning.
    pub fn log_audits(&mut self, conn: &mut SqliteConnection, entries: Vec<NewAuditEntry>) {
        self.advance(SyncPhase::AuditLogged);
        let total = entries.len();
        let mut failed = 0usize;
        let mut first_error = None;
        for entry in entries {
            let entity = entry.entity;
            let entity_id = entry.entity_id.clone();
            if let Err(err) = savepoint(conn, |sp| write_audit(sp, entry)) {
                error!(
                    "Audit entry for {:?} '{}' could not be written: {}",
                    entity, entity_id, err
                );
                failed += 1;
                first_error.get_or_insert_with(|| err.to_string());
            }
        }
        if failed > 0 {
            self.warnings.push(SyncWarning::new(
                SyncStep::AuditLog,
                format!(
                    "{} of {} audit entries could not be written: {}",
                    failed,
                    total,
                    first_error.unwrap_or_default()
                ),
            ));
        }
    }

    pub fn finish(mut self) -> Vec<SyncWarning> {
        self.advance(SyncPhase::Committed);
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use edc_core::errors::{Error, ValidationError};

    #[tokio::test]
    async fn failed_step_becomes_warning_and_later_steps_run() {
        let (_pool, writer) = setup_db();
        let (warnings, values) = writer
            .exec(|conn| {
                let mut pipeline = StepPipeline::after_primary_write();
                let first = pipeline.run(conn, SyncStep::Parameters, |_| Ok(1));
                let second: Option<i32> = pipeline.run(conn, SyncStep::GroupClasses, |_| {
                    Err(Error::Validation(ValidationError::InvalidInput("boom".into())))
                });
                let third = pipeline.run(conn, SyncStep::Sites, |_| Ok(3));
                pipeline.log_audits(conn, Vec::new());
                Ok((pipeline.finish(), (first, second, third)))
            })
            .await
            .expect("exec");

        assert_eq!(values, (Some(1), None, Some(3)));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, SyncStep::GroupClasses);
        assert!(warnings[0].message.contains("boom"));
    }
}
