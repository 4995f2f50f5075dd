use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::info;

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result};
use edc_core::studies::{
    FormAssignment, FormAssignmentExtras, RecordStatus, StudyDefinition, StudyRepositoryTrait,
    StudySyncRequest, SyncOutcome, VisitRemoval,
};

use super::model::{
    FormAssignmentDB, FormAssignmentExtrasDB, GroupClassDB, SiteDB, StudyDB, StudyGroupDB,
    StudyParameterDB, VisitDefinitionDB,
};
use super::synchronizer::synchronize_study_tx;
use crate::audit::write_audit;
use crate::db::capabilities::CapabilityCache;
use crate::db::{enum_from_db, enum_to_db, get_connection, now_rfc3339, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{
    form_assignments, group_classes, sites, studies, study_groups, study_parameters,
    visit_definitions, visit_instances,
};

pub struct StudyRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
    capabilities: CapabilityCache,
}

impl StudyRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self {
            pool,
            writer,
            capabilities: CapabilityCache::default(),
        }
    }

    fn load_assignments(
        &self,
        conn: &mut SqliteConnection,
        visit_ids: &[String],
    ) -> Result<HashMap<String, Vec<FormAssignment>>> {
        let rows = form_assignments::table
            .filter(form_assignments::visit_definition_id.eq_any(visit_ids))
            .order((form_assignments::ordinal.asc(), form_assignments::id.asc()))
            .select(FormAssignmentDB::as_select())
            .load::<FormAssignmentDB>(conn)
            .map_err(StorageError::from)?;

        let mut extras: HashMap<String, FormAssignmentExtras> = HashMap::new();
        if self.capabilities.get_or_probe(conn)?.form_assignment_extras {
            extras = form_assignments::table
                .filter(form_assignments::visit_definition_id.eq_any(visit_ids))
                .select(FormAssignmentExtrasDB::as_select())
                .load::<FormAssignmentExtrasDB>(conn)
                .map_err(StorageError::from)?
                .into_iter()
                .map(|row| (row.id.clone(), FormAssignmentExtras::from(row)))
                .collect();
        }

        let mut by_visit: HashMap<String, Vec<FormAssignment>> = HashMap::new();
        for row in rows {
            let visit_id = row.visit_definition_id.clone();
            let extra = extras.remove(&row.id);
            by_visit
                .entry(visit_id)
                .or_default()
                .push(row.into_domain(extra)?);
        }
        Ok(by_visit)
    }

    fn get_study_definition_impl(&self, study_id: &str) -> Result<Option<StudyDefinition>> {
        let mut conn = get_connection(&self.pool)?;
        let Some(study) = studies::table
            .find(study_id)
            .select(StudyDB::as_select())
            .first::<StudyDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
        else {
            return Ok(None);
        };

        let parameters: BTreeMap<String, String> = study_parameters::table
            .filter(study_parameters::study_id.eq(study_id))
            .select(StudyParameterDB::as_select())
            .load::<StudyParameterDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect();

        let visit_rows = visit_definitions::table
            .filter(visit_definitions::study_id.eq(study_id))
            .order((
                visit_definitions::ordinal.asc(),
                visit_definitions::name.asc(),
                visit_definitions::id.asc(),
            ))
            .select(VisitDefinitionDB::as_select())
            .load::<VisitDefinitionDB>(&mut conn)
            .map_err(StorageError::from)?;
        let visit_ids: Vec<String> = visit_rows.iter().map(|v| v.id.clone()).collect();
        let mut assignments = self.load_assignments(&mut conn, &visit_ids)?;
        let visit_definitions = visit_rows
            .into_iter()
            .map(|row| {
                let forms = assignments.remove(&row.id).unwrap_or_default();
                row.into_domain(forms)
            })
            .collect::<Result<Vec<_>>>()?;

        let class_rows = group_classes::table
            .filter(group_classes::study_id.eq(study_id))
            .order(group_classes::name.asc())
            .select(GroupClassDB::as_select())
            .load::<GroupClassDB>(&mut conn)
            .map_err(StorageError::from)?;
        let class_ids: Vec<String> = class_rows.iter().map(|c| c.id.clone()).collect();
        let mut groups_by_class: HashMap<String, Vec<StudyGroupDB>> = HashMap::new();
        for group in study_groups::table
            .filter(study_groups::group_class_id.eq_any(&class_ids))
            .order(study_groups::name.asc())
            .select(StudyGroupDB::as_select())
            .load::<StudyGroupDB>(&mut conn)
            .map_err(StorageError::from)?
        {
            groups_by_class
                .entry(group.group_class_id.clone())
                .or_default()
                .push(group);
        }
        let group_classes = class_rows
            .into_iter()
            .map(|row| {
                let groups = groups_by_class
                    .remove(&row.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(StudyGroupDB::into_domain)
                    .collect::<Result<Vec<_>>>()?;
                row.into_domain(groups)
            })
            .collect::<Result<Vec<_>>>()?;

        let sites = sites::table
            .filter(sites::study_id.eq(study_id))
            .order(sites::unique_identifier.asc())
            .select(SiteDB::as_select())
            .load::<SiteDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(SiteDB::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(StudyDefinition {
            status: enum_from_db(&study.status)?,
            id: study.id,
            unique_identifier: study.unique_identifier,
            name: study.name,
            summary: study.summary,
            principal_investigator: study.principal_investigator,
            sponsor: study.sponsor,
            owner: study.owner,
            created_at: study.created_at,
            updated_at: study.updated_at,
            updated_by: study.updated_by,
            parameters,
            visit_definitions,
            group_classes,
            sites,
        }))
    }
}

#[async_trait]
impl StudyRepositoryTrait for StudyRepository {
    async fn synchronize_study(&self, request: StudySyncRequest) -> Result<SyncOutcome> {
        let capabilities = self.capabilities.clone();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<SyncOutcome> {
                let caps = capabilities.get_or_probe(conn)?;
                synchronize_study_tx(conn, request, caps)
            })
            .await
    }

    fn get_study_definition(&self, study_id: &str) -> Result<Option<StudyDefinition>> {
        self.get_study_definition_impl(study_id)
    }

    fn find_study_id_by_identifier(&self, unique_identifier: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(studies::table
            .filter(studies::unique_identifier.eq(unique_identifier))
            .select(studies::id)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?)
    }

    async fn remove_visit_definition(
        &self,
        visit_definition_id: String,
        actor: String,
    ) -> Result<VisitRemoval> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<VisitRemoval> {
                let before = visit_definitions::table
                    .find(&visit_definition_id)
                    .select(VisitDefinitionDB::as_select())
                    .first::<VisitDefinitionDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .ok_or_else(|| Error::not_found("visit definition", &visit_definition_id))?;

                let instances: i64 = visit_instances::table
                    .filter(visit_instances::visit_definition_id.eq(&visit_definition_id))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;

                let old_value = serde_json::to_value(&before)?;
                if instances == 0 {
                    diesel::delete(
                        form_assignments::table
                            .filter(form_assignments::visit_definition_id.eq(&visit_definition_id)),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                    diesel::delete(visit_definitions::table.find(&visit_definition_id))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    write_audit(
                        conn,
                        NewAuditEntry::new(
                            &actor,
                            AuditEntity::VisitDefinition,
                            &visit_definition_id,
                            AuditAction::Delete,
                        )
                        .with_values(Some(old_value), None),
                    )?;
                    info!("Visit definition {} deleted", visit_definition_id);
                    return Ok(VisitRemoval::Deleted);
                }

                let removed = enum_to_db(&RecordStatus::Removed)?;
                diesel::update(visit_definitions::table.find(&visit_definition_id))
                    .set((
                        visit_definitions::status.eq(&removed),
                        visit_definitions::updated_at.eq(now_rfc3339()),
                        visit_definitions::updated_by.eq(&actor),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(
                        &actor,
                        AuditEntity::VisitDefinition,
                        &visit_definition_id,
                        AuditAction::Remove,
                    )
                    .with_values(
                        Some(old_value),
                        Some(serde_json::json!({ "status": removed })),
                    )
                    .with_reason(format!("{} visit instance(s) reference it", instances)),
                )?;
                info!(
                    "Visit definition {} flagged removed ({} instance(s))",
                    visit_definition_id, instances
                );
                Ok(VisitRemoval::FlaggedRemoved)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        assignment, seed_template, setup_db, study_input, visit, vitals_fields, TestPool,
    };
    use edc_core::studies::{GroupClassInput, GroupInput, SiteInput, SyncStep};
    use serde_json::json;

    fn count_rows(pool: &TestPool, table: &str) -> i64 {
        #[derive(diesel::QueryableByName)]
        struct CountRow {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            c: i64,
        }
        let mut conn = get_connection(pool).expect("conn");
        diesel::sql_query(format!("SELECT COUNT(*) AS c FROM {}", table))
            .get_result::<CountRow>(&mut conn)
            .expect("count")
            .c
    }

    fn site(identifier: &str) -> SiteInput {
        SiteInput {
            unique_identifier: identifier.to_string(),
            name: format!("Site {}", identifier),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failed_group_class_step_keeps_primary_visits_and_sites() {
        let (pool, writer) = setup_db();
        let (template, _) = seed_template(&pool, &writer, "Vitals", vitals_fields()).await;
        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::sql_query(
                "CREATE TRIGGER fail_group_classes BEFORE INSERT ON group_classes \
                 BEGIN SELECT RAISE(ABORT, 'forced group class failure'); END;",
            )
            .execute(&mut conn)
            .expect("create trigger");
        }
        let repo = StudyRepository::new(pool.clone(), writer);

        let mut input = study_input("HT-01");
        let mut screening = visit("Screening", 1);
        screening.form_assignments.push(assignment(&template.id, true));
        input.visit_definitions = vec![screening, visit("Baseline", 2)];
        input.group_classes = vec![GroupClassInput {
            name: "Arm".to_string(),
            groups: vec![GroupInput {
                name: "Placebo".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }];
        input.sites = vec![site("OSL"), site("BGO")];

        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync succeeds with warnings");

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].step, SyncStep::GroupClasses);
        assert!(outcome.warnings[0].message.contains("forced group class failure"));

        let study = repo
            .get_study_definition(&outcome.study_id)
            .expect("read")
            .expect("study exists");
        assert_eq!(study.visit_definitions.len(), 2);
        assert_eq!(study.visit_definitions[0].form_assignments.len(), 1);
        assert_eq!(study.sites.len(), 2);
        assert!(study.group_classes.is_empty());
        assert_eq!(count_rows(&pool, "study_groups"), 0);
    }

    fn create_trigger(pool: &TestPool, sql: &str) {
        let mut conn = get_connection(pool).expect("conn");
        diesel::sql_query(sql).execute(&mut conn).expect("create trigger");
    }

    #[tokio::test]
    async fn failed_nested_audit_entry_becomes_warning() {
        let (pool, writer) = setup_db();
        create_trigger(
            &pool,
            "CREATE TRIGGER fail_site_audit BEFORE INSERT ON audit_log \
             WHEN NEW.entity_type = 'site' \
             BEGIN SELECT RAISE(ABORT, 'forced site audit failure'); END;",
        );
        let repo = StudyRepository::new(pool, writer);

        let mut input = study_input("AU-01");
        input.sites = vec![site("OSL")];
        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync succeeds with warnings");

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].step, SyncStep::AuditLog);
        assert!(outcome.warnings[0].message.contains("forced site audit failure"));
        let study = repo
            .get_study_definition(&outcome.study_id)
            .expect("read")
            .expect("study exists");
        assert_eq!(study.sites.len(), 1);
    }

    #[tokio::test]
    async fn failed_primary_audit_rolls_back_the_study() {
        let (pool, writer) = setup_db();
        create_trigger(
            &pool,
            "CREATE TRIGGER fail_study_audit BEFORE INSERT ON audit_log \
             WHEN NEW.entity_type = 'study' AND NEW.action = 'create' \
             BEGIN SELECT RAISE(ABORT, 'forced study audit failure'); END;",
        );
        let audit_rows = count_rows(&pool, "audit_log");
        let repo = StudyRepository::new(pool.clone(), writer);

        let mut input = study_input("AU-02");
        input.sites = vec![site("OSL")];
        let err = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Audit(ref msg) if msg.contains("forced study audit failure")));
        assert_eq!(repo.find_study_id_by_identifier("AU-02").expect("lookup"), None);
        assert_eq!(count_rows(&pool, "sites"), 0);
        assert_eq!(count_rows(&pool, "audit_log"), audit_rows);
    }

    #[tokio::test]
    async fn reordering_visits_keeps_assignment_on_same_visit() {
        let (pool, writer) = setup_db();
        let (template, version) = seed_template(&pool, &writer, "Vitals", vitals_fields()).await;
        let repo = StudyRepository::new(pool, writer);

        let mut input = study_input("HT-02");
        let mut v1 = visit("Visit 1", 1);
        v1.form_assignments.push(assignment(&template.id, true));
        input.visit_definitions = vec![v1, visit("Visit 2", 2), visit("Visit 3", 3)];
        let created = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("create");
        assert!(created.created);

        let before = repo
            .get_study_definition(&created.study_id)
            .expect("read")
            .expect("exists");
        let v1_before = before
            .visit_definitions
            .iter()
            .find(|v| v.name == "Visit 1")
            .expect("visit 1");
        let assignment_id = v1_before.form_assignments[0].id.clone();
        assert_eq!(v1_before.form_assignments[0].default_version_id, version.id);

        let mut update = study_input("HT-02");
        update.id = Some(created.study_id.clone());
        update.visit_definitions = before
            .visit_definitions
            .iter()
            .map(|v| {
                let mut input = visit(&v.name, v.ordinal);
                input.id = Some(v.id.clone());
                input.form_assignments = v
                    .form_assignments
                    .iter()
                    .map(|a| {
                        let mut fa = assignment(&a.form_template_id, a.required);
                        fa.id = Some(a.id.clone());
                        fa
                    })
                    .collect();
                if v.name == "Visit 1" {
                    input.ordinal = 2;
                }
                input
            })
            .collect();
        update.visit_definitions.push(visit("Visit 0", 1));

        let updated = repo
            .synchronize_study(StudySyncRequest::new(update, "monitor"))
            .await
            .expect("update");
        assert!(!updated.created);
        assert!(updated.warnings.is_empty());

        let after = repo
            .get_study_definition(&created.study_id)
            .expect("read")
            .expect("exists");
        assert_eq!(after.visit_definitions.len(), 4);
        let mut ordinals: Vec<i32> = after.visit_definitions.iter().map(|v| v.ordinal).collect();
        ordinals.sort();
        assert_eq!(ordinals, vec![1, 2, 2, 3]);

        let v1_after = after
            .visit_definitions
            .iter()
            .find(|v| v.id == v1_before.id)
            .expect("same visit id");
        assert_eq!(v1_after.ordinal, 2);
        assert_eq!(v1_after.form_assignments.len(), 1);
        assert_eq!(v1_after.form_assignments[0].id, assignment_id);
        assert!(v1_after.form_assignments[0].required);
    }

    #[tokio::test]
    async fn duplicate_identifier_aborts_before_any_write() {
        let (pool, writer) = setup_db();
        let repo = StudyRepository::new(pool.clone(), writer);
        repo.synchronize_study(StudySyncRequest::new(study_input("DUP"), "monitor"))
            .await
            .expect("first");
        let audit_rows = count_rows(&pool, "audit_log");

        let mut second = study_input("DUP");
        second.sites = vec![site("OSL")];
        let err = repo
            .synchronize_study(StudySyncRequest::new(second, "monitor"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::IdentityConflict(ref id) if id == "DUP"));
        assert_eq!(count_rows(&pool, "studies"), 1);
        assert_eq!(count_rows(&pool, "sites"), 0);
        assert_eq!(count_rows(&pool, "audit_log"), audit_rows);
    }

    #[tokio::test]
    async fn unknown_nested_id_is_inserted_not_dropped() {
        let (pool, writer) = setup_db();
        let repo = StudyRepository::new(pool, writer);
        let mut input = study_input("HT-03");
        let mut ghost = visit("Ghost", 1);
        ghost.id = Some("no-such-visit".to_string());
        input.visit_definitions = vec![ghost];

        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync");
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.visit_definition_ids.len(), 1);
        assert_ne!(outcome.visit_definition_ids[0], "no-such-visit");

        let study = repo
            .get_study_definition(&outcome.study_id)
            .expect("read")
            .expect("exists");
        assert_eq!(study.visit_definitions[0].id, outcome.visit_definition_ids[0]);
    }

    #[tokio::test]
    async fn parameters_store_one_row_per_canonical_key() {
        let (pool, writer) = setup_db();
        let repo = StudyRepository::new(pool.clone(), writer);

        let mut input = study_input("HT-04");
        input.parameters.insert("personIdShownOnCrf".into(), json!(true));
        input.parameters.insert("subjectIdPrefix".into(), json!("AB"));
        input.parameters.insert("subjectIdSuffix".into(), json!("9"));
        input.parameters.insert("subjectPersonIdRequired".into(), json!(false));
        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync");

        // A row written under a legacy spelling before normalization existed.
        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::insert_into(study_parameters::table)
                .values(StudyParameterDB {
                    study_id: outcome.study_id.clone(),
                    name: "personIdShownOnCrf".to_string(),
                    value: "false".to_string(),
                    updated_at: now_rfc3339(),
                    updated_by: "legacy".to_string(),
                })
                .execute(&mut conn)
                .expect("legacy row");
        }

        let mut update = study_input("HT-04");
        update.id = Some(outcome.study_id.clone());
        update
            .parameters
            .insert("PERSON_ID_SHOWN_ON_CRF".into(), json!("yes"));
        update
            .parameters
            .insert("subjectIdPrefixSuffix".into(), json!("AB|9"));
        repo.synchronize_study(StudySyncRequest::new(update, "monitor"))
            .await
            .expect("update");

        let study = repo
            .get_study_definition(&outcome.study_id)
            .expect("read")
            .expect("exists");
        let expected: BTreeMap<String, String> = [
            ("personIdShownOnCRF", "true"),
            ("subjectIdPrefixSuffix", "AB|9"),
            ("subjectPersonIdRequired", "not used"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(study.parameters, expected);
    }

    #[tokio::test]
    async fn case_variant_parameter_rows_are_removed() {
        let (pool, writer) = setup_db();
        let repo = StudyRepository::new(pool.clone(), writer);

        let mut input = study_input("HT-05");
        input.parameters.insert("futureFeatureToggle".into(), json!("beta"));
        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync");
        {
            let mut conn = get_connection(&pool).expect("conn");
            for (name, value) in [
                ("PERSON_ID_SHOWN_ON_CRF", "false"),
                ("collect_dob", "1"),
                ("subject_id_prefix", "OLD"),
            ] {
                diesel::insert_into(study_parameters::table)
                    .values(StudyParameterDB {
                        study_id: outcome.study_id.clone(),
                        name: name.to_string(),
                        value: value.to_string(),
                        updated_at: now_rfc3339(),
                        updated_by: "legacy".to_string(),
                    })
                    .execute(&mut conn)
                    .expect("legacy row");
            }
        }

        let mut update = study_input("HT-05");
        update.id = Some(outcome.study_id.clone());
        update.parameters.insert("personIdShownOnCRF".into(), json!(true));
        update.parameters.insert("collectDob".into(), json!("3"));
        update.parameters.insert("futureFeatureToggle".into(), json!("beta"));
        repo.synchronize_study(StudySyncRequest::new(update, "monitor"))
            .await
            .expect("update");

        let study = repo
            .get_study_definition(&outcome.study_id)
            .expect("read")
            .expect("exists");
        let expected: BTreeMap<String, String> = [
            ("collectDob", "3"),
            ("futureFeatureToggle", "beta"),
            ("personIdShownOnCRF", "true"),
            // No canonical prefix/suffix was written, so its old part stays.
            ("subject_id_prefix", "OLD"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(study.parameters, expected);
    }

    #[tokio::test]
    async fn assignment_settings_follow_schema_capabilities() {
        let (pool, writer) = setup_db();
        let (template, _) = seed_template(&pool, &writer, "Vitals", vitals_fields()).await;

        let build = |identifier: &str| {
            let mut input = study_input(identifier);
            let mut v = visit("Screening", 1);
            let mut fa = assignment(&template.id, false);
            fa.hide_form = Some(true);
            fa.sdv_code = Some("100%".to_string());
            v.form_assignments.push(fa);
            input.visit_definitions = vec![v];
            input
        };

        let repo = StudyRepository::new(pool.clone(), writer.clone());
        let with_columns = repo
            .synchronize_study(StudySyncRequest::new(build("CAP-1"), "monitor"))
            .await
            .expect("sync");
        let study = repo
            .get_study_definition(&with_columns.study_id)
            .expect("read")
            .expect("exists");
        let extras = study.visit_definitions[0].form_assignments[0]
            .extras
            .clone()
            .expect("extras stored");
        assert!(extras.hide_form);
        assert_eq!(extras.sdv_code.as_deref(), Some("100%"));

        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::sql_query("ALTER TABLE form_assignments DROP COLUMN participant_form")
                .execute(&mut conn)
                .expect("drop participant_form");
            diesel::sql_query("ALTER TABLE form_assignments DROP COLUMN sdv_code")
                .execute(&mut conn)
                .expect("drop sdv_code");
            diesel::sql_query("ALTER TABLE form_assignments DROP COLUMN hide_form")
                .execute(&mut conn)
                .expect("drop hide_form");
        }

        let legacy_repo = StudyRepository::new(pool, writer);
        let without_columns = legacy_repo
            .synchronize_study(StudySyncRequest::new(build("CAP-2"), "monitor"))
            .await
            .expect("sync on legacy schema");
        assert!(without_columns.warnings.is_empty());
        let study = legacy_repo
            .get_study_definition(&without_columns.study_id)
            .expect("read")
            .expect("exists");
        assert_eq!(study.visit_definitions[0].form_assignments.len(), 1);
        assert!(study.visit_definitions[0].form_assignments[0].extras.is_none());
    }

    #[tokio::test]
    async fn visit_without_instances_is_deleted() {
        let (pool, writer) = setup_db();
        let (template, _) = seed_template(&pool, &writer, "Vitals", vitals_fields()).await;
        let repo = StudyRepository::new(pool.clone(), writer);
        let mut input = study_input("HT-05");
        let mut v = visit("Follow-up", 1);
        v.form_assignments.push(assignment(&template.id, false));
        input.visit_definitions = vec![v];
        let outcome = repo
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("sync");

        let removal = repo
            .remove_visit_definition(outcome.visit_definition_ids[0].clone(), "monitor".into())
            .await
            .expect("remove");
        assert_eq!(removal, VisitRemoval::Deleted);
        assert_eq!(count_rows(&pool, "visit_definitions"), 0);
        assert_eq!(count_rows(&pool, "form_assignments"), 0);

        let err = repo
            .remove_visit_definition("missing".into(), "monitor".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
