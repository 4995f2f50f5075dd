use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result, ValidationError};
use edc_core::studies::RecordStatus;
use edc_core::subjects::{
    FormInstance, NewSubject, ScheduleVisit, Subject, SubjectRepositoryTrait, SubjectStatus,
    VisitInstance, VisitStatus,
};

use super::model::{FormInstanceDB, SubjectDB, VisitInstanceDB};
use crate::audit::write_audit;
use crate::db::{enum_to_db, get_connection, new_id, now_rfc3339, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{form_instances, sites, studies, subjects, visit_definitions, visit_instances};

pub struct SubjectRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SubjectRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

fn enroll_subject_tx(
    conn: &mut SqliteConnection,
    new_subject: NewSubject,
    actor: &str,
) -> Result<Subject> {
    let study = studies::table
        .find(&new_subject.study_id)
        .select(studies::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if study.is_none() {
        return Err(Error::not_found("study", new_subject.study_id));
    }

    let taken = subjects::table
        .filter(subjects::study_id.eq(&new_subject.study_id))
        .filter(subjects::label.eq(&new_subject.label))
        .select(subjects::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if taken.is_some() {
        return Err(Error::invalid_input(format!(
            "Subject label '{}' is already used in this study",
            new_subject.label
        )));
    }

    if let Some(site_id) = new_subject.site_id.as_deref() {
        let site_study = sites::table
            .find(site_id)
            .select(sites::study_id)
            .first::<String>(conn)
            .optional()
            .map_err(StorageError::from)?;
        match site_study {
            None => return Err(Error::not_found("site", site_id)),
            Some(study_id) if study_id != new_subject.study_id => {
                return Err(Error::invalid_input(format!(
                    "Site '{}' belongs to another study",
                    site_id
                )))
            }
            Some(_) => {}
        }
    }

    let row = SubjectDB {
        id: new_id(),
        study_id: new_subject.study_id,
        label: new_subject.label,
        secondary_label: new_subject.secondary_label,
        person_id: new_subject.person_id,
        gender: new_subject.gender,
        date_of_birth: new_subject.date_of_birth,
        site_id: new_subject.site_id,
        status: enum_to_db(&SubjectStatus::Available)?,
        enrolled_at: now_rfc3339(),
        created_by: actor.to_string(),
    };
    diesel::insert_into(subjects::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    write_audit(
        conn,
        NewAuditEntry::new(actor, AuditEntity::Subject, &row.id, AuditAction::Create)
            .with_values(None, Some(serde_json::to_value(&row)?)),
    )?;
    row.into_domain()
}

fn schedule_visit_tx(
    conn: &mut SqliteConnection,
    request: ScheduleVisit,
    actor: &str,
) -> Result<VisitInstance> {
    let Some(study_id) = subjects::table
        .find(&request.subject_id)
        .select(subjects::study_id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?
    else {
        return Err(Error::not_found("subject", request.subject_id));
    };

    let Some((definition_study, repeating, status)) = visit_definitions::table
        .find(&request.visit_definition_id)
        .select((
            visit_definitions::study_id,
            visit_definitions::repeating,
            visit_definitions::status,
        ))
        .first::<(String, bool, String)>(conn)
        .optional()
        .map_err(StorageError::from)?
    else {
        return Err(Error::not_found("visit definition", request.visit_definition_id));
    };
    if definition_study != study_id {
        return Err(Error::invalid_input(format!(
            "Visit definition '{}' belongs to another study",
            request.visit_definition_id
        )));
    }
    if status != enum_to_db(&RecordStatus::Active)? {
        return Err(Error::invalid_input(format!(
            "Visit definition '{}' has been removed",
            request.visit_definition_id
        )));
    }

    let current: Option<i32> = visit_instances::table
        .filter(visit_instances::subject_id.eq(&request.subject_id))
        .filter(visit_instances::visit_definition_id.eq(&request.visit_definition_id))
        .select(max(visit_instances::occurrence))
        .first(conn)
        .map_err(StorageError::from)?;
    if current.is_some() && !repeating {
        return Err(ValidationError::InvalidInput(format!(
            "Visit definition '{}' is not repeating and is already scheduled",
            request.visit_definition_id
        ))
        .into());
    }

    let row = VisitInstanceDB {
        id: new_id(),
        subject_id: request.subject_id,
        visit_definition_id: request.visit_definition_id,
        occurrence: current.unwrap_or(0) + 1,
        status: enum_to_db(&VisitStatus::Scheduled)?,
        scheduled_at: request.scheduled_at,
        location: request.location,
        created_at: now_rfc3339(),
        created_by: actor.to_string(),
    };
    diesel::insert_into(visit_instances::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    write_audit(
        conn,
        NewAuditEntry::new(actor, AuditEntity::VisitInstance, &row.id, AuditAction::Create)
            .with_values(None, Some(serde_json::to_value(&row)?)),
    )?;
    debug!(
        "Scheduled occurrence {} of visit {} for subject {}",
        row.occurrence, row.visit_definition_id, row.subject_id
    );
    row.into_domain()
}

#[async_trait]
impl SubjectRepositoryTrait for SubjectRepository {
    async fn enroll_subject(&self, new_subject: NewSubject, actor: String) -> Result<Subject> {
        if new_subject.label.trim().is_empty() {
            return Err(ValidationError::MissingField("label").into());
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Subject> {
                enroll_subject_tx(conn, new_subject, &actor)
            })
            .await
    }

    fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>> {
        let mut conn = get_connection(&self.pool)?;
        subjects::table
            .find(subject_id)
            .select(SubjectDB::as_select())
            .first::<SubjectDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(SubjectDB::into_domain)
            .transpose()
    }

    async fn schedule_visit(
        &self,
        request: ScheduleVisit,
        actor: String,
    ) -> Result<VisitInstance> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<VisitInstance> {
                schedule_visit_tx(conn, request, &actor)
            })
            .await
    }

    fn list_visit_instances(&self, subject_id: &str) -> Result<Vec<VisitInstance>> {
        let mut conn = get_connection(&self.pool)?;
        visit_instances::table
            .inner_join(visit_definitions::table)
            .filter(visit_instances::subject_id.eq(subject_id))
            .order((
                visit_definitions::ordinal.asc(),
                visit_instances::occurrence.asc(),
                visit_instances::id.asc(),
            ))
            .select(VisitInstanceDB::as_select())
            .load::<VisitInstanceDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(VisitInstanceDB::into_domain)
            .collect()
    }

    fn list_form_instances(&self, visit_instance_id: &str) -> Result<Vec<FormInstance>> {
        let mut conn = get_connection(&self.pool)?;
        form_instances::table
            .filter(form_instances::visit_instance_id.eq(visit_instance_id))
            .order((form_instances::created_at.asc(), form_instances::id.asc()))
            .select(FormInstanceDB::as_select())
            .load::<FormInstanceDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(FormInstanceDB::into_domain)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studies::StudyRepository;
    use crate::test_support::{setup_db, study_input, visit};
    use edc_core::studies::{StudyRepositoryTrait, StudySyncRequest, VisitRemoval};

    async fn seeded_study(
        studies: &StudyRepository,
        identifier: &str,
    ) -> (String, String, String) {
        let mut input = study_input(identifier);
        let mut unscheduled = visit("Adverse event", 2);
        unscheduled.repeating = true;
        input.visit_definitions = vec![visit("Screening", 1), unscheduled];
        let outcome = studies
            .synchronize_study(StudySyncRequest::new(input, "monitor"))
            .await
            .expect("study");
        (
            outcome.study_id,
            outcome.visit_definition_ids[0].clone(),
            outcome.visit_definition_ids[1].clone(),
        )
    }

    fn new_subject(study_id: &str, label: &str) -> NewSubject {
        NewSubject {
            study_id: study_id.to_string(),
            label: label.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repeating_visits_get_increasing_occurrences() {
        let (pool, writer) = setup_db();
        let studies = StudyRepository::new(pool.clone(), writer.clone());
        let repo = SubjectRepository::new(pool, writer);
        let (study_id, screening, adverse) = seeded_study(&studies, "SUB-01").await;
        let subject = repo
            .enroll_subject(new_subject(&study_id, "001"), "coordinator".into())
            .await
            .expect("enroll");
        assert_eq!(subject.status, SubjectStatus::Available);

        let schedule = |definition: &str| ScheduleVisit {
            subject_id: subject.id.clone(),
            visit_definition_id: definition.to_string(),
            ..Default::default()
        };
        let first = repo
            .schedule_visit(schedule(&adverse), "coordinator".into())
            .await
            .expect("first");
        let second = repo
            .schedule_visit(schedule(&adverse), "coordinator".into())
            .await
            .expect("second");
        assert_eq!((first.occurrence, second.occurrence), (1, 2));

        repo.schedule_visit(schedule(&screening), "coordinator".into())
            .await
            .expect("screening");
        let err = repo
            .schedule_visit(schedule(&screening), "coordinator".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let instances = repo.list_visit_instances(&subject.id).expect("list");
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].visit_definition_id, screening);
    }

    #[tokio::test]
    async fn enrollment_checks_study_and_label() {
        let (pool, writer) = setup_db();
        let studies = StudyRepository::new(pool.clone(), writer.clone());
        let repo = SubjectRepository::new(pool, writer);
        let (study_id, _, _) = seeded_study(&studies, "SUB-02").await;

        let err = repo
            .enroll_subject(new_subject("missing", "001"), "coordinator".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        repo.enroll_subject(new_subject(&study_id, "001"), "coordinator".into())
            .await
            .expect("enroll");
        let err = repo
            .enroll_subject(new_subject(&study_id, "001"), "coordinator".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn identifier_is_frozen_once_subjects_enroll() {
        let (pool, writer) = setup_db();
        let studies = StudyRepository::new(pool.clone(), writer.clone());
        let repo = SubjectRepository::new(pool, writer);
        let (study_id, _, _) = seeded_study(&studies, "SUB-03").await;
        repo.enroll_subject(new_subject(&study_id, "001"), "coordinator".into())
            .await
            .expect("enroll");

        let mut renamed = study_input("SUB-03-RENAMED");
        renamed.id = Some(study_id.clone());
        let err = studies
            .synchronize_study(StudySyncRequest::new(renamed, "monitor"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImmutableIdentifier { enrolled: 1, .. }));

        let study = studies
            .get_study_definition(&study_id)
            .expect("read")
            .expect("exists");
        assert_eq!(study.unique_identifier, "SUB-03");
    }

    #[tokio::test]
    async fn visit_with_instances_is_flagged_not_deleted() {
        let (pool, writer) = setup_db();
        let studies = StudyRepository::new(pool.clone(), writer.clone());
        let repo = SubjectRepository::new(pool, writer);
        let (study_id, screening, _) = seeded_study(&studies, "SUB-04").await;
        let subject = repo
            .enroll_subject(new_subject(&study_id, "001"), "coordinator".into())
            .await
            .expect("enroll");
        repo.schedule_visit(
            ScheduleVisit {
                subject_id: subject.id.clone(),
                visit_definition_id: screening.clone(),
                ..Default::default()
            },
            "coordinator".into(),
        )
        .await
        .expect("schedule");

        let removal = studies
            .remove_visit_definition(screening.clone(), "monitor".into())
            .await
            .expect("remove");
        assert_eq!(removal, VisitRemoval::FlaggedRemoved);

        let study = studies
            .get_study_definition(&study_id)
            .expect("read")
            .expect("exists");
        let flagged = study
            .visit_definitions
            .iter()
            .find(|v| v.id == screening)
            .expect("row kept");
        assert_eq!(flagged.status, RecordStatus::Removed);
        assert_eq!(repo.list_visit_instances(&subject.id).expect("list").len(), 1);
    }
}
