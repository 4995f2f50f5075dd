//! Fixtures shared by the repository tests.

use std::sync::Arc;

use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use tempfile::tempdir;

use edc_core::studies::{
    FormAssignmentInput, StudyDefinitionInput, StudyRepositoryTrait, StudySyncRequest,
    VisitDefinitionInput,
};
use edc_core::subjects::{NewSubject, ScheduleVisit, SubjectRepositoryTrait};
use edc_core::templates::{
    FieldType, FormTemplate, FormTemplateRepositoryTrait, FormTemplateVersion, NewFormTemplate,
    NewTemplateField, NewTemplateVersion,
};

use crate::db::{create_pool, init, run_migrations, write_actor::spawn_writer, WriteHandle};
use crate::studies::StudyRepository;
use crate::subjects::SubjectRepository;
use crate::templates::FormTemplateRepository;

pub(crate) type TestPool = Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>;

pub(crate) fn setup_db() -> (TestPool, WriteHandle) {
    let app_data = tempdir()
        .expect("tempdir")
        .keep()
        .to_string_lossy()
        .to_string();
    let db_path = init(&app_data).expect("init db");
    run_migrations(&db_path).expect("migrate db");
    let pool = create_pool(&db_path).expect("create pool");
    let writer = spawn_writer(pool.as_ref().clone());
    (pool, writer)
}

pub(crate) fn vitals_fields() -> Vec<NewTemplateField> {
    vec![
        NewTemplateField::new("systolic", FieldType::Integer, 1).required(),
        NewTemplateField::new("diastolic", FieldType::Integer, 2).required(),
        NewTemplateField::new("position", FieldType::Radio, 3)
            .with_options(&[("sit", "Sitting"), ("sup", "Supine")]),
    ]
}

/// A template with one active version carrying `fields`.
pub(crate) async fn seed_template(
    pool: &TestPool,
    writer: &WriteHandle,
    name: &str,
    fields: Vec<NewTemplateField>,
) -> (FormTemplate, FormTemplateVersion) {
    let repo = FormTemplateRepository::new(pool.clone(), writer.clone());
    let template = repo
        .create_template(
            NewFormTemplate {
                name: name.to_string(),
                ..Default::default()
            },
            "designer".to_string(),
        )
        .await
        .expect("create template");
    let version = repo
        .add_version(
            template.id.clone(),
            NewTemplateVersion {
                name: format!("{} v1", name),
                fields,
                ..Default::default()
            },
            "designer".to_string(),
        )
        .await
        .expect("add version");
    (template, version)
}

pub(crate) fn visit(name: &str, ordinal: i32) -> VisitDefinitionInput {
    VisitDefinitionInput {
        name: name.to_string(),
        ordinal,
        ..Default::default()
    }
}

pub(crate) fn assignment(template_id: &str, required: bool) -> FormAssignmentInput {
    FormAssignmentInput {
        form_template_id: template_id.to_string(),
        required,
        ordinal: 1,
        ..Default::default()
    }
}

pub(crate) fn study_input(identifier: &str) -> StudyDefinitionInput {
    StudyDefinitionInput {
        unique_identifier: identifier.to_string(),
        name: format!("Study {}", identifier),
        ..Default::default()
    }
}

/// One subject with one scheduled visit whose definition carries an
/// assignment per template, in template order.
pub(crate) struct Scenario {
    pub study_id: String,
    pub subject_id: String,
    pub visit_instance_id: String,
    pub assignment_ids: Vec<String>,
    pub version_ids: Vec<String>,
}

pub(crate) async fn enrolled_scenario(
    pool: &TestPool,
    writer: &WriteHandle,
    templates: &[&str],
) -> Scenario {
    let mut baseline = visit("Baseline", 1);
    let mut version_ids = Vec::new();
    for (idx, name) in templates.iter().enumerate() {
        let (template, version) = seed_template(pool, writer, name, vitals_fields()).await;
        let mut fa = assignment(&template.id, true);
        fa.ordinal = idx as i32 + 1;
        baseline.form_assignments.push(fa);
        version_ids.push(version.id);
    }
    let mut input = study_input("SCN-01");
    input.visit_definitions = vec![baseline];

    let studies = StudyRepository::new(pool.clone(), writer.clone());
    let outcome = studies
        .synchronize_study(StudySyncRequest::new(input, "monitor"))
        .await
        .expect("study");
    let definition = studies
        .get_study_definition(&outcome.study_id)
        .expect("read")
        .expect("study exists");
    let assignment_ids = definition.visit_definitions[0]
        .form_assignments
        .iter()
        .map(|a| a.id.clone())
        .collect();

    let subjects = SubjectRepository::new(pool.clone(), writer.clone());
    let subject = subjects
        .enroll_subject(
            NewSubject {
                study_id: outcome.study_id.clone(),
                label: "001".to_string(),
                ..Default::default()
            },
            "coordinator".to_string(),
        )
        .await
        .expect("enroll");
    let visit_instance = subjects
        .schedule_visit(
            ScheduleVisit {
                subject_id: subject.id.clone(),
                visit_definition_id: outcome.visit_definition_ids[0].clone(),
                ..Default::default()
            },
            "coordinator".to_string(),
        )
        .await
        .expect("schedule");

    Scenario {
        study_id: outcome.study_id,
        subject_id: subject.id,
        visit_instance_id: visit_instance.id,
        assignment_ids,
        version_ids,
    }
}
