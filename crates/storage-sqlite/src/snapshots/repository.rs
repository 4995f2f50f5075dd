use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result, SnapshotError, ValidationError};
use edc_core::snapshots::{
    build_field_list, FieldList, FormSnapshot, RebuildFailure, RebuildSummary,
    SnapshotRepositoryTrait, SubjectSnapshotCount,
};
use edc_core::studies::RecordStatus;
use edc_core::subjects::{FormInstance, FormStatus, VisitStatus};

use super::model::{FormSnapshotDB, SubjectSnapshotCountRow};
use crate::audit::write_audit;
use crate::db::{enum_to_db, get_connection, new_id, now_rfc3339, savepoint, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{form_assignments, form_instances, form_snapshots, visit_instances};
use crate::subjects::FormInstanceDB;
use crate::templates::{find_version, load_fields};

const EMPTY_ANSWERS: &str = "{}";

/// Reads a version and its fields and builds the frozen field list.
pub(crate) fn build_snapshot_tx(conn: &mut SqliteConnection, version_id: &str) -> Result<FieldList> {
    let version = find_version(conn, version_id)?
        .ok_or_else(|| SnapshotError::VersionNotFound(version_id.to_string()))?;
    let fields = load_fields(conn, version_id)?;
    Ok(build_field_list(&version, &fields)?)
}

fn assignment_version(conn: &mut SqliteConnection, form_assignment_id: &str) -> Result<String> {
    form_assignments::table
        .find(form_assignment_id)
        .select(form_assignments::default_version_id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?
        .ok_or_else(|| Error::not_found("form assignment", form_assignment_id))
}

fn find_snapshot(
    conn: &mut SqliteConnection,
    form_instance_id: &str,
) -> Result<Option<FormSnapshotDB>> {
    Ok(form_snapshots::table
        .filter(form_snapshots::form_instance_id.eq(form_instance_id))
        .select(FormSnapshotDB::as_select())
        .first::<FormSnapshotDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

/// Returns the form instance for the pair, creating it when absent. The
/// boolean is `true` when a new row was written.
pub(crate) fn ensure_form_instance(
    conn: &mut SqliteConnection,
    visit_instance_id: &str,
    form_assignment_id: &str,
    actor: &str,
) -> Result<(FormInstanceDB, bool)> {
    let existing = form_instances::table
        .filter(form_instances::visit_instance_id.eq(visit_instance_id))
        .filter(form_instances::form_assignment_id.eq(form_assignment_id))
        .select(FormInstanceDB::as_select())
        .first::<FormInstanceDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if let Some(row) = existing {
        return Ok((row, false));
    }

    let (visit_definition_id, visit_status) = visit_instances::table
        .find(visit_instance_id)
        .select((visit_instances::visit_definition_id, visit_instances::status))
        .first::<(String, String)>(conn)
        .optional()
        .map_err(StorageError::from)?
        .ok_or_else(|| Error::not_found("visit instance", visit_instance_id))?;
    if visit_status == enum_to_db(&VisitStatus::Removed)? {
        return Err(Error::invalid_input(format!(
            "Visit instance '{}' has been removed",
            visit_instance_id
        )));
    }

    let (assignment_visit, assignment_status) = form_assignments::table
        .find(form_assignment_id)
        .select((form_assignments::visit_definition_id, form_assignments::status))
        .first::<(String, String)>(conn)
        .optional()
        .map_err(StorageError::from)?
        .ok_or_else(|| Error::not_found("form assignment", form_assignment_id))?;
    if assignment_visit != visit_definition_id {
        return Err(Error::invalid_input(format!(
            "Form assignment '{}' does not belong to the visit of '{}'",
            form_assignment_id, visit_instance_id
        )));
    }
    if assignment_status != enum_to_db(&RecordStatus::Active)? {
        return Err(Error::invalid_input(format!(
            "Form assignment '{}' has been removed",
            form_assignment_id
        )));
    }

    let now = now_rfc3339();
    let row = FormInstanceDB {
        id: new_id(),
        visit_instance_id: visit_instance_id.to_string(),
        form_assignment_id: form_assignment_id.to_string(),
        status: enum_to_db(&FormStatus::InitialDataEntry)?,
        interviewer_name: None,
        interview_date: None,
        created_at: now.clone(),
        updated_at: now,
        created_by: actor.to_string(),
    };
    diesel::insert_into(form_instances::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    write_audit(
        conn,
        NewAuditEntry::new(actor, AuditEntity::FormInstance, &row.id, AuditAction::Create)
            .with_values(None, Some(serde_json::to_value(&row)?)),
    )?;
    Ok((row, true))
}

/// Builds a snapshot from the assignment's default version and stores it
/// for `form_instance_id`, audited under `action`.
pub(crate) fn capture_snapshot(
    conn: &mut SqliteConnection,
    form_instance_id: &str,
    form_assignment_id: &str,
    answers: String,
    actor: &str,
    action: AuditAction,
    reason: Option<&str>,
) -> Result<FormSnapshotDB> {
    let version_id = assignment_version(conn, form_assignment_id)?;
    let field_list = build_snapshot_tx(conn, &version_id)?;
    let row = FormSnapshotDB::capture(
        new_id(),
        form_instance_id,
        &field_list,
        answers,
        now_rfc3339(),
        actor,
    )?;
    diesel::insert_into(form_snapshots::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;

    let mut entry = NewAuditEntry::new(actor, AuditEntity::FormSnapshot, &row.id, action)
        .with_values(
            None,
            Some(serde_json::json!({
                "formInstanceId": form_instance_id,
                "versionId": row.version_id,
                "fieldCount": row.field_count,
            })),
        );
    if let Some(reason) = reason {
        entry = entry.with_reason(reason);
    }
    write_audit(conn, entry)?;
    Ok(row)
}

/// Form instances whose snapshot the rebuild regenerates: the instance and
/// its visit are not removed and the assignment is active.
fn eligible_instances(conn: &mut SqliteConnection) -> Result<Vec<(String, String)>> {
    Ok(form_instances::table
        .inner_join(visit_instances::table)
        .inner_join(form_assignments::table)
        .filter(form_instances::status.ne(enum_to_db(&FormStatus::Removed)?))
        .filter(visit_instances::status.ne(enum_to_db(&VisitStatus::Removed)?))
        .filter(form_assignments::status.eq(enum_to_db(&RecordStatus::Active)?))
        .order(form_instances::id.asc())
        .select((form_instances::id, form_instances::form_assignment_id))
        .load::<(String, String)>(conn)
        .map_err(StorageError::from)?)
}

/// Deletes a snapshot, keeping its structure and answers in the audit row.
fn discard_snapshot(conn: &mut SqliteConnection, old: &FormSnapshotDB, actor: &str) -> Result<()> {
    diesel::delete(form_snapshots::table.find(&old.id))
        .execute(conn)
        .map_err(StorageError::from)?;
    let answers: serde_json::Value = serde_json::from_str(&old.answers)?;
    write_audit(
        conn,
        NewAuditEntry::new(actor, AuditEntity::FormSnapshot, &old.id, AuditAction::Delete)
            .with_values(
                Some(serde_json::json!({
                    "formInstanceId": old.form_instance_id,
                    "versionId": old.version_id,
                    "fieldCount": old.field_count,
                    "answers": answers,
                })),
                None,
            )
            .with_reason("discarded by snapshot rebuild"),
    )?;
    Ok(())
}

fn rebuild_all_tx(conn: &mut SqliteConnection, actor: &str) -> Result<RebuildSummary> {
    let mut previous: HashMap<String, FormSnapshotDB> = form_snapshots::table
        .select(FormSnapshotDB::as_select())
        .load::<FormSnapshotDB>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .map(|row| (row.form_instance_id.clone(), row))
        .collect();
    let eligible = eligible_instances(conn)?;

    let mut summary = RebuildSummary::default();
    for (form_instance_id, form_assignment_id) in eligible {
        let old = previous.remove(&form_instance_id);
        let answers = old
            .as_ref()
            .map(|row| row.answers.clone())
            .unwrap_or_else(|| EMPTY_ANSWERS.to_string());
        let rebuilt = savepoint(conn, |sp| {
            if let Some(old) = &old {
                discard_snapshot(sp, old, actor)?;
            }
            capture_snapshot(
                sp,
                &form_instance_id,
                &form_assignment_id,
                answers,
                actor,
                AuditAction::Rebuild,
                None,
            )
        });
        match rebuilt {
            Ok(_) => {
                summary.rebuilt += 1;
                if old.is_some() {
                    summary.discarded += 1;
                }
            }
            Err(e) => {
                warn!("Snapshot rebuild failed for form instance {}: {}", form_instance_id, e);
                summary.failures.push(RebuildFailure {
                    form_instance_id,
                    message: e.to_string(),
                });
            }
        }
    }
    // Snapshots of removed instances, visits or assignments stay as history.
    summary.retained = previous.len() as i64;

    write_audit(
        conn,
        NewAuditEntry::new(actor, AuditEntity::FormSnapshot, "*", AuditAction::Rebuild).with_values(
            None,
            Some(serde_json::json!({
                "discarded": summary.discarded,
                "rebuilt": summary.rebuilt,
                "retained": summary.retained,
                "failed": summary.failures.len(),
            })),
        ),
    )?;
    info!(
        "Snapshot rebuild: {} discarded, {} rebuilt, {} retained, {} failed",
        summary.discarded,
        summary.rebuilt,
        summary.retained,
        summary.failures.len()
    );
    Ok(summary)
}

pub struct SnapshotRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SnapshotRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SnapshotRepositoryTrait for SnapshotRepository {
    fn build_snapshot(&self, version_id: &str) -> Result<FieldList> {
        let mut conn = get_connection(&self.pool)?;
        build_snapshot_tx(&mut conn, version_id)
    }

    fn get_form_snapshot(&self, form_instance_id: &str) -> Result<Option<FormSnapshot>> {
        let mut conn = get_connection(&self.pool)?;
        find_snapshot(&mut conn, form_instance_id)?
            .map(FormSnapshotDB::into_domain)
            .transpose()
    }

    async fn open_form_instance(
        &self,
        visit_instance_id: String,
        form_assignment_id: String,
        actor: String,
    ) -> Result<FormInstance> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormInstance> {
                let (row, created) =
                    ensure_form_instance(conn, &visit_instance_id, &form_assignment_id, &actor)?;
                if created {
                    capture_snapshot(
                        conn,
                        &row.id,
                        &form_assignment_id,
                        EMPTY_ANSWERS.to_string(),
                        &actor,
                        AuditAction::Create,
                        None,
                    )?;
                    debug!("Opened form instance {} with snapshot", row.id);
                }
                row.into_domain()
            })
            .await
    }

    async fn record_answers(
        &self,
        form_instance_id: String,
        answers: serde_json::Value,
        actor: String,
    ) -> Result<FormSnapshot> {
        if !answers.is_object() {
            return Err(Error::invalid_input("answers must be a JSON object"));
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormSnapshot> {
                let before = find_snapshot(conn, &form_instance_id)?
                    .ok_or_else(|| Error::not_found("form snapshot", form_instance_id.clone()))?;
                let text = serde_json::to_string(&answers)?;
                let now = now_rfc3339();
                diesel::update(form_snapshots::table.find(&before.id))
                    .set(form_snapshots::answers.eq(&text))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::update(form_instances::table.find(&form_instance_id))
                    .set(form_instances::updated_at.eq(&now))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(
                        &actor,
                        AuditEntity::FormInstance,
                        &form_instance_id,
                        AuditAction::Update,
                    )
                    .with_values(
                        Some(serde_json::from_str(&before.answers)?),
                        Some(answers),
                    ),
                )?;
                FormSnapshotDB {
                    answers: text,
                    ..before
                }
                .into_domain()
            })
            .await
    }

    async fn refresh_stale_snapshot(
        &self,
        form_instance_id: String,
        actor: String,
        reason: String,
    ) -> Result<FormSnapshot> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingField("reason").into());
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormSnapshot> {
                let before = find_snapshot(conn, &form_instance_id)?
                    .ok_or_else(|| Error::not_found("form snapshot", form_instance_id.clone()))?;
                let form_assignment_id = form_instances::table
                    .find(&form_instance_id)
                    .select(form_instances::form_assignment_id)
                    .first::<String>(conn)
                    .map_err(StorageError::from)?;
                let version_id = assignment_version(conn, &form_assignment_id)?;
                let field_list = build_snapshot_tx(conn, &version_id)?;
                let after = FormSnapshotDB::capture(
                    before.id.clone(),
                    &form_instance_id,
                    &field_list,
                    before.answers.clone(),
                    now_rfc3339(),
                    &actor,
                )?;
                diesel::update(form_snapshots::table.find(&before.id))
                    .set((
                        form_snapshots::version_id.eq(&after.version_id),
                        form_snapshots::field_count.eq(after.field_count),
                        form_snapshots::fields.eq(&after.fields),
                        form_snapshots::captured_at.eq(&after.captured_at),
                        form_snapshots::captured_by.eq(&after.captured_by),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(&actor, AuditEntity::FormSnapshot, &before.id, AuditAction::Repair)
                        .with_values(
                            Some(serde_json::json!({
                                "versionId": before.version_id,
                                "fieldCount": before.field_count,
                            })),
                            Some(serde_json::json!({
                                "versionId": after.version_id,
                                "fieldCount": after.field_count,
                            })),
                        )
                        .with_reason(reason),
                )?;
                after.into_domain()
            })
            .await
    }

    fn count_snapshots(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(form_snapshots::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }

    fn count_replaceable_snapshots(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(form_snapshots::table
            .inner_join(
                form_instances::table
                    .inner_join(visit_instances::table)
                    .inner_join(form_assignments::table),
            )
            .filter(form_instances::status.ne(enum_to_db(&FormStatus::Removed)?))
            .filter(visit_instances::status.ne(enum_to_db(&VisitStatus::Removed)?))
            .filter(form_assignments::status.eq(enum_to_db(&RecordStatus::Active)?))
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }

    async fn rebuild_all_snapshots(&self, actor: String) -> Result<RebuildSummary> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<RebuildSummary> {
                rebuild_all_tx(conn, &actor)
            })
            .await
    }

    fn instance_snapshot_counts(&self) -> Result<Vec<SubjectSnapshotCount>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = diesel::sql_query(
            "SELECT s.id AS subject_id, s.label AS label, \
                    COUNT(fi.id) AS form_instances, COUNT(fs.id) AS snapshots \
             FROM subjects s \
             LEFT JOIN visit_instances vi ON vi.subject_id = s.id \
             LEFT JOIN form_instances fi ON fi.visit_instance_id = vi.id \
             LEFT JOIN form_snapshots fs ON fs.form_instance_id = fi.id \
             GROUP BY s.id, s.label \
             ORDER BY s.label, s.id",
        )
        .load::<SubjectSnapshotCountRow>(&mut conn)
        .map_err(StorageError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| SubjectSnapshotCount {
                subject_id: row.subject_id,
                label: row.label,
                form_instances: row.form_instances,
                snapshots: row.snapshots,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRepository;
    use crate::templates::FormTemplateRepository;
    use crate::test_support::{enrolled_scenario, setup_db};
    use edc_core::audit::AuditRepositoryTrait;
    use edc_core::templates::{FieldType, FormTemplateRepositoryTrait, NewTemplateField};
    use serde_json::json;

    #[tokio::test]
    async fn opening_a_form_captures_its_version_once() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool, writer);

        let instance = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        let again = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("reopen");
        assert_eq!(instance.id, again.id);
        assert_eq!(instance.status, FormStatus::InitialDataEntry);
        assert_eq!(repo.count_snapshots().expect("count"), 1);

        let snapshot = repo
            .get_form_snapshot(&instance.id)
            .expect("read")
            .expect("snapshot");
        assert_eq!(snapshot.version_id, scenario.version_ids[0]);
        assert_eq!(snapshot.field_count, 3);
        let names: Vec<&str> = snapshot.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["systolic", "diastolic", "position"]);
        assert_eq!(snapshot.answers, json!({}));
    }

    #[tokio::test]
    async fn unknown_assignment_is_not_found() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool, writer);

        let err = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                "unknown-assignment".into(),
                "coordinator".into(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(repo.count_snapshots().expect("count"), 0);
    }

    #[tokio::test]
    async fn refresh_rebuilds_fields_and_keeps_answers() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool.clone(), writer.clone());
        let instance = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        repo.record_answers(
            instance.id.clone(),
            json!({"systolic": 120, "diastolic": 80}),
            "coordinator".into(),
        )
        .await
        .expect("answers");

        let templates = FormTemplateRepository::new(pool.clone(), writer.clone());
        templates
            .add_field(
                scenario.version_ids[0].clone(),
                NewTemplateField::new("pulse", FieldType::Integer, 4),
                "designer".into(),
            )
            .await
            .expect("add field");

        let err = repo
            .refresh_stale_snapshot(instance.id.clone(), "monitor".into(), "  ".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let refreshed = repo
            .refresh_stale_snapshot(
                instance.id.clone(),
                "monitor".into(),
                "pulse added to vitals".into(),
            )
            .await
            .expect("refresh");
        assert_eq!(refreshed.field_count, 4);
        assert_eq!(refreshed.answers, json!({"systolic": 120, "diastolic": 80}));

        let audits = AuditRepository::new(pool)
            .list_audit_entries(AuditEntity::FormSnapshot, &refreshed.id)
            .expect("audit");
        let repair = audits
            .iter()
            .find(|e| e.action == AuditAction::Repair)
            .expect("repair audited");
        assert_eq!(repair.reason.as_deref(), Some("pulse added to vitals"));
        assert_eq!(repair.old_value, Some(json!({"versionId": scenario.version_ids[0], "fieldCount": 3})));
    }

    #[tokio::test]
    async fn answers_must_be_an_object() {
        let (pool, writer) = setup_db();
        let repo = SnapshotRepository::new(pool, writer);
        let err = repo
            .record_answers("any".into(), json!([1, 2]), "coordinator".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn rebuild_restores_every_snapshot_and_reports_failures() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals", "Labs"]).await;
        let repo = SnapshotRepository::new(pool.clone(), writer.clone());
        let vitals = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open vitals");
        let labs = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[1].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open labs");
        repo.record_answers(vitals.id.clone(), json!({"systolic": 110}), "coordinator".into())
            .await
            .expect("answers");

        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::delete(form_snapshots::table.filter(form_snapshots::form_instance_id.eq(&labs.id)))
                .execute(&mut conn)
                .expect("drop labs snapshot");
        }
        let before = repo.instance_snapshot_counts().expect("counts");
        assert_eq!(before.len(), 1);
        assert_eq!((before[0].form_instances, before[0].snapshots), (2, 1));

        let summary = repo
            .rebuild_all_snapshots("admin".into())
            .await
            .expect("rebuild");
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.rebuilt, 2);
        assert!(summary.failures.is_empty());
        let after = repo.instance_snapshot_counts().expect("counts");
        assert_eq!((after[0].form_instances, after[0].snapshots), (2, 2));
        let vitals_snapshot = repo
            .get_form_snapshot(&vitals.id)
            .expect("read")
            .expect("snapshot");
        assert_eq!(vitals_snapshot.answers, json!({"systolic": 110}));

        // An enumerated field without options cannot be frozen.
        FormTemplateRepository::new(pool, writer)
            .add_field(
                scenario.version_ids[1].clone(),
                NewTemplateField::new("specimen", FieldType::SingleSelect, 5),
                "designer".into(),
            )
            .await
            .expect("add field");
        let summary = repo
            .rebuild_all_snapshots("admin".into())
            .await
            .expect("rebuild");
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.rebuilt, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].form_instance_id, labs.id);
        assert_eq!(repo.count_snapshots().expect("count"), 2);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_snapshot_and_answers() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool.clone(), writer.clone());
        let vitals = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        repo.record_answers(vitals.id.clone(), json!({"systolic": 120}), "coordinator".into())
            .await
            .expect("answers");
        let before = repo
            .get_form_snapshot(&vitals.id)
            .expect("read")
            .expect("snapshot");

        FormTemplateRepository::new(pool.clone(), writer)
            .add_field(
                scenario.version_ids[0].clone(),
                NewTemplateField::new("position", FieldType::SingleSelect, 9),
                "designer".into(),
            )
            .await
            .expect("add field");
        let summary = repo
            .rebuild_all_snapshots("admin".into())
            .await
            .expect("rebuild");
        assert_eq!(summary.discarded, 0);
        assert_eq!(summary.rebuilt, 0);
        assert_eq!(summary.failures.len(), 1);

        let after = repo
            .get_form_snapshot(&vitals.id)
            .expect("read")
            .expect("snapshot kept");
        assert_eq!(after, before);
        assert_eq!(after.answers, json!({"systolic": 120}));

        let audits = AuditRepository::new(pool)
            .list_audit_entries(AuditEntity::FormSnapshot, &before.id)
            .expect("audit");
        assert!(audits.iter().all(|e| e.action != AuditAction::Delete));
    }

    #[tokio::test]
    async fn rebuild_audits_each_discarded_snapshot() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool.clone(), writer);
        let vitals = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open");
        repo.record_answers(vitals.id.clone(), json!({"systolic": 120}), "coordinator".into())
            .await
            .expect("answers");
        let old = repo
            .get_form_snapshot(&vitals.id)
            .expect("read")
            .expect("snapshot");

        let summary = repo
            .rebuild_all_snapshots("admin".into())
            .await
            .expect("rebuild");
        assert_eq!((summary.discarded, summary.rebuilt), (1, 1));

        let audits = AuditRepository::new(pool)
            .list_audit_entries(AuditEntity::FormSnapshot, &old.id)
            .expect("audit");
        let discarded = audits
            .iter()
            .find(|e| e.action == AuditAction::Delete)
            .expect("discard audited");
        assert_eq!(discarded.actor, "admin");
        assert_eq!(
            discarded.old_value,
            Some(json!({
                "formInstanceId": vitals.id,
                "versionId": scenario.version_ids[0],
                "fieldCount": 3,
                "answers": {"systolic": 120},
            }))
        );
        assert_eq!(discarded.new_value, None);
    }

    #[tokio::test]
    async fn rebuild_keeps_snapshots_of_removed_forms() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals", "Labs"]).await;
        let repo = SnapshotRepository::new(pool.clone(), writer);
        let vitals = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[0].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open vitals");
        let labs = repo
            .open_form_instance(
                scenario.visit_instance_id.clone(),
                scenario.assignment_ids[1].clone(),
                "coordinator".into(),
            )
            .await
            .expect("open labs");
        let labs_before = repo
            .get_form_snapshot(&labs.id)
            .expect("read")
            .expect("snapshot");
        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::update(form_instances::table.find(&labs.id))
                .set(form_instances::status.eq(enum_to_db(&FormStatus::Removed).expect("status")))
                .execute(&mut conn)
                .expect("remove labs");
        }
        assert_eq!(repo.count_snapshots().expect("count"), 2);
        assert_eq!(repo.count_replaceable_snapshots().expect("replaceable"), 1);

        let summary = repo
            .rebuild_all_snapshots("admin".into())
            .await
            .expect("rebuild");
        assert_eq!((summary.discarded, summary.rebuilt, summary.retained), (1, 1, 1));
        assert!(repo.get_form_snapshot(&vitals.id).expect("read").is_some());
        assert_eq!(
            repo.get_form_snapshot(&labs.id).expect("read"),
            Some(labs_before)
        );
    }

    #[tokio::test]
    async fn building_twice_yields_identical_field_lists() {
        let (pool, writer) = setup_db();
        let scenario = enrolled_scenario(&pool, &writer, &["Vitals"]).await;
        let repo = SnapshotRepository::new(pool, writer);

        let first = repo.build_snapshot(&scenario.version_ids[0]).expect("first");
        let second = repo.build_snapshot(&scenario.version_ids[0]).expect("second");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).expect("encode"),
            serde_json::to_vec(&second).expect("encode")
        );
    }

    #[test]
    fn building_an_unknown_version_fails() {
        let (pool, writer) = setup_db();
        let repo = SnapshotRepository::new(pool, writer);
        let err = repo.build_snapshot("missing").unwrap_err();
        assert!(matches!(
            err,
            Error::Snapshot(SnapshotError::VersionNotFound(ref id)) if id == "missing"
        ));
    }
}
