//! Loads a subject's expected-vs-actual form state and restores missing
//! snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};

use edc_core::audit::AuditAction;
use edc_core::errors::Result;
use edc_core::reconciliation::{
    classify_subject_forms, Classification, ExpectedForm, InstanceState,
    ReconciliationRepositoryTrait, RepairError, RepairOutcome, ResolvedVersion, SnapshotState,
    SubjectFormState, VisitFormState,
};
use edc_core::studies::RecordStatus;
use edc_core::subjects::VisitStatus;

use crate::db::{enum_to_db, get_connection, savepoint, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{
    form_assignments, form_instances, form_snapshots, form_template_versions, subjects,
    template_fields, visit_definitions, visit_instances,
};
use crate::snapshots::{capture_snapshot, ensure_form_instance};

const REPAIR_REASON: &str = "missing form snapshot restored";

type InstanceRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i32>,
);

fn resolve_versions(
    conn: &mut SqliteConnection,
    version_ids: &[String],
) -> Result<HashMap<String, ResolvedVersion>> {
    let existing = form_template_versions::table
        .filter(form_template_versions::id.eq_any(version_ids))
        .select(form_template_versions::id)
        .load::<String>(conn)
        .map_err(StorageError::from)?;
    let counts: HashMap<String, i64> = template_fields::table
        .filter(template_fields::version_id.eq_any(version_ids))
        .group_by(template_fields::version_id)
        .select((template_fields::version_id, count_star()))
        .load::<(String, i64)>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .collect();

    Ok(existing
        .into_iter()
        .map(|version_id| {
            let field_count = counts.get(&version_id).copied().unwrap_or(0);
            let resolved = ResolvedVersion {
                version_id: version_id.clone(),
                field_count: i32::try_from(field_count).unwrap_or(i32::MAX),
            };
            (version_id, resolved)
        })
        .collect())
}

/// Every non-removed visit instance of the subject crossed with the active
/// assignments of its definition. `None` when the subject does not exist.
pub(crate) fn load_subject_form_state_tx(
    conn: &mut SqliteConnection,
    subject_id: &str,
) -> Result<Option<SubjectFormState>> {
    let subject = subjects::table
        .find(subject_id)
        .select(subjects::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if subject.is_none() {
        return Ok(None);
    }

    let visits = visit_instances::table
        .inner_join(visit_definitions::table)
        .filter(visit_instances::subject_id.eq(subject_id))
        .filter(visit_instances::status.ne(enum_to_db(&VisitStatus::Removed)?))
        .order((
            visit_definitions::ordinal.asc(),
            visit_instances::occurrence.asc(),
            visit_instances::id.asc(),
        ))
        .select((visit_instances::id, visit_instances::visit_definition_id))
        .load::<(String, String)>(conn)
        .map_err(StorageError::from)?;

    let definition_ids: Vec<String> = visits
        .iter()
        .map(|(_, definition_id)| definition_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let assignments = form_assignments::table
        .filter(form_assignments::visit_definition_id.eq_any(&definition_ids))
        .filter(form_assignments::status.eq(enum_to_db(&RecordStatus::Active)?))
        .order((form_assignments::ordinal.asc(), form_assignments::id.asc()))
        .select((
            form_assignments::id,
            form_assignments::visit_definition_id,
            form_assignments::default_version_id,
        ))
        .load::<(String, String, String)>(conn)
        .map_err(StorageError::from)?;

    let version_ids: Vec<String> = assignments
        .iter()
        .map(|(_, _, version_id)| version_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let resolved = resolve_versions(conn, &version_ids)?;

    let visit_ids: Vec<String> = visits.iter().map(|(id, _)| id.clone()).collect();
    let instance_rows = form_instances::table
        .left_join(form_snapshots::table)
        .filter(form_instances::visit_instance_id.eq_any(&visit_ids))
        .select((
            form_instances::id,
            form_instances::visit_instance_id,
            form_instances::form_assignment_id,
            form_snapshots::id.nullable(),
            form_snapshots::version_id.nullable(),
            form_snapshots::field_count.nullable(),
        ))
        .load::<InstanceRow>(conn)
        .map_err(StorageError::from)?;
    let mut instances: HashMap<(String, String), InstanceState> = HashMap::new();
    for (form_instance_id, visit_instance_id, form_assignment_id, snap_id, snap_version, snap_count) in
        instance_rows
    {
        let snapshot = match (snap_id, snap_version, snap_count) {
            (Some(snapshot_id), Some(version_id), Some(field_count)) => Some(SnapshotState {
                snapshot_id,
                version_id,
                field_count,
            }),
            _ => None,
        };
        instances.insert(
            (visit_instance_id, form_assignment_id),
            InstanceState {
                form_instance_id,
                snapshot,
            },
        );
    }

    let mut by_definition: HashMap<&str, Vec<&(String, String, String)>> = HashMap::new();
    for row in &assignments {
        by_definition.entry(row.1.as_str()).or_default().push(row);
    }

    let visits = visits
        .iter()
        .map(|(visit_instance_id, definition_id)| VisitFormState {
            visit_instance_id: visit_instance_id.clone(),
            forms: by_definition
                .get(definition_id.as_str())
                .map(|rows| {
                    rows.iter()
                        .map(|(assignment_id, _, version_id)| ExpectedForm {
                            form_assignment_id: assignment_id.clone(),
                            resolved_version: resolved.get(version_id).cloned(),
                            instance: instances
                                .remove(&(visit_instance_id.clone(), assignment_id.clone())),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    Ok(Some(SubjectFormState {
        subject_id: subject_id.to_string(),
        visits,
    }))
}

fn repair_missing_tx(
    conn: &mut SqliteConnection,
    subject_id: &str,
    actor: &str,
) -> Result<Option<RepairOutcome>> {
    let Some(state) = load_subject_form_state_tx(conn, subject_id)? else {
        return Ok(None);
    };
    let report = classify_subject_forms(&state);

    let mut outcome = RepairOutcome::default();
    for entry in report
        .entries
        .iter()
        .filter(|e| e.classification == Classification::Missing)
    {
        let repaired = savepoint(conn, |sp| {
            let (instance, _) =
                ensure_form_instance(sp, &entry.visit_instance_id, &entry.form_assignment_id, actor)?;
            capture_snapshot(
                sp,
                &instance.id,
                &entry.form_assignment_id,
                "{}".to_string(),
                actor,
                AuditAction::Repair,
                Some(REPAIR_REASON),
            )
        });
        match repaired {
            Ok(_) => outcome.repaired_count += 1,
            Err(e) => {
                warn!(
                    "Could not repair form {} of visit instance {}: {}",
                    entry.form_assignment_id, entry.visit_instance_id, e
                );
                outcome.errors.push(RepairError {
                    visit_instance_id: entry.visit_instance_id.clone(),
                    form_assignment_id: entry.form_assignment_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    debug!(
        "Subject {}: {} missing snapshot(s) repaired",
        subject_id, outcome.repaired_count
    );
    Ok(Some(outcome))
}

pub struct ReconciliationRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl ReconciliationRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ReconciliationRepositoryTrait for ReconciliationRepository {
    fn load_subject_form_state(&self, subject_id: &str) -> Result<Option<SubjectFormState>> {
        let mut conn = get_connection(&self.pool)?;
        load_subject_form_state_tx(&mut conn, subject_id)
    }

    async fn repair_missing_snapshots(
        &self,
        subject_id: String,
        actor: String,
    ) -> Result<Option<RepairOutcome>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<RepairOutcome>> {
                repair_missing_tx(conn, &subject_id, &actor)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::SnapshotRepository;
    use crate::studies::StudyRepository;
    use crate::subjects::SubjectRepository;
    use crate::templates::FormTemplateRepository;
    use crate::test_support::{enrolled_scenario, setup_db, study_input, visit, TestPool};
    use edc_core::reconciliation::{ReconciliationService, ReconciliationServiceTrait};
    use edc_core::snapshots::SnapshotRepositoryTrait;
    use edc_core::studies::{StudyRepositoryTrait, StudySyncRequest};
    use edc_core::subjects::{ScheduleVisit, SubjectRepositoryTrait};
    use edc_core::templates::{FieldType, FormTemplateRepositoryTrait, NewTemplateField};

    fn service(pool: &TestPool, writer: &WriteHandle) -> ReconciliationService {
        ReconciliationService::new(
            Arc::new(ReconciliationRepository::new(pool.clone(), writer.clone())),
            Arc::new(SnapshotRepository::new(pool.clone(), writer.clone())),
        )
    }

    #[tokio::test]
    async fn missing_snapshots_are_repaired_once() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals", "Labs"]).await;
        let snapshots = SnapshotRepository::new(pool.clone(), writer.clone());
        let opened = snapshots
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        let service = service(&pool, &writer);

        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.count(Classification::Consistent), 1);
        assert_eq!(report.count(Classification::Missing), 1);
        assert_eq!(report.entries[0].form_instance_id.as_deref(), Some(opened.id.as_str()));
        assert_eq!(report.entries[1].form_assignment_id, scenario.assignment_ids[1]);

        let outcome = service
            .repair_missing_snapshots(&scenario.subject_id, "monitor")
            .await
            .expect("repair")
            .expect("subject exists");
        assert_eq!(outcome.repaired_count, 1);
        assert!(outcome.errors.is_empty());

        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert!(report.is_consistent());

        let again = service
            .repair_missing_snapshots(&scenario.subject_id, "monitor")
            .await
            .expect("repair")
            .expect("subject exists");
        assert_eq!(again.repaired_count, 0);
        assert_eq!(snapshots.count_snapshots().expect("count"), 2);
    }

    #[tokio::test]
    async fn visits_without_assignments_add_no_entries() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;

        // Two more visits with no forms; the baseline visit is left as is.
        let mut update = study_input("SCN-01");
        update.id = Some(scenario.study_id.clone());
        update.visit_definitions = vec![visit("Week 4", 2), visit("Week 8", 3)];
        let outcome = StudyRepository::new(pool.clone(), writer.clone())
            .synchronize_study(StudySyncRequest::new(update, "monitor"))
            .await
            .expect("add visits");
        assert!(outcome.warnings.is_empty());

        let subjects = SubjectRepository::new(pool.clone(), writer.clone());
        for visit_definition_id in &outcome.visit_definition_ids {
            subjects
                .schedule_visit(
                    ScheduleVisit {
                        subject_id: scenario.subject_id.clone(),
                        visit_definition_id: visit_definition_id.clone(),
                        ..Default::default()
                    },
                    "coordinator".into(),
                )
                .await
                .expect("schedule");
        }
        assert_eq!(
            subjects
                .list_visit_instances(&scenario.subject_id)
                .expect("visits")
                .len(),
            3
        );

        let service = service(&pool, &writer);
        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].classification, Classification::Missing);
        assert_eq!(report.entries[0].visit_instance_id, scenario.visit_instance_id);

        let repaired = service
            .repair_missing_snapshots(&scenario.subject_id, "monitor")
            .await
            .expect("repair")
            .expect("subject exists");
        assert_eq!(repaired.repaired_count, 1);

        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert_eq!(report.entries.len(), 1);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn instance_without_snapshot_is_reused_by_repair() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let snapshots = SnapshotRepository::new(pool.clone(), writer.clone());
        let opened = snapshots
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::delete(form_snapshots::table)
                .execute(&mut conn)
                .expect("drop snapshot");
        }

        let service = service(&pool, &writer);
        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert_eq!(report.entries[0].classification, Classification::Missing);
        assert_eq!(report.entries[0].form_instance_id.as_deref(), Some(opened.id.as_str()));

        service
            .repair_missing_snapshots(&scenario.subject_id, "monitor")
            .await
            .expect("repair");
        let snapshot = snapshots
            .get_form_snapshot(&opened.id)
            .expect("read")
            .expect("restored on the same instance");
        assert_eq!(snapshot.version_id, scenario.version_ids[0]);
    }

    #[tokio::test]
    async fn stale_snapshots_are_reported_but_not_repaired() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let snapshots = SnapshotRepository::new(pool.clone(), writer.clone());
        let opened = snapshots
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        FormTemplateRepository::new(pool.clone(), writer.clone())
            .add_field(
                scenario.version_ids[0].clone(),
                NewTemplateField::new("pulse", FieldType::Integer, 4),
                "designer".into(),
            )
            .await
            .expect("add field");

        let service = service(&pool, &writer);
        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert_eq!(report.count(Classification::Stale), 1);

        let outcome = service
            .repair_missing_snapshots(&scenario.subject_id, "monitor")
            .await
            .expect("repair")
            .expect("subject exists");
        assert_eq!(outcome.repaired_count, 0);
        let snapshot = snapshots
            .get_form_snapshot(&opened.id)
            .expect("read")
            .expect("snapshot");
        assert_eq!(snapshot.field_count, 3);

        snapshots
            .refresh_stale_snapshot(opened.id.clone(), "monitor".into(), "pulse added".into())
            .await
            .expect("refresh");
        let report = service
            .verify_form_integrity(&scenario.subject_id)
            .expect("verify")
            .expect("subject exists");
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn unknown_subject_yields_no_report() {
        let (pool, writer) = setup_db();
        let service = service(&pool, &writer);
        assert!(service
            .verify_form_integrity("missing")
            .expect("verify")
            .is_none());
        assert!(service
            .repair_missing_snapshots("missing", "monitor")
            .await
            .expect("repair")
            .is_none());
    }
}
