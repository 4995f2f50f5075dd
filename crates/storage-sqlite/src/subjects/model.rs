use diesel::prelude::*;
use serde::Serialize;

use edc_core::errors::Result;
use edc_core::subjects::{FormInstance, Subject, VisitInstance};

use crate::db::enum_from_db;

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::subjects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct SubjectDB {
    pub id: String,
    pub study_id: String,
    pub label: String,
    pub secondary_label: Option<String>,
    pub person_id: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub site_id: Option<String>,
    pub status: String,
    pub enrolled_at: String,
    pub created_by: String,
}

impl SubjectDB {
    pub fn into_domain(self) -> Result<Subject> {
        Ok(Subject {
            status: enum_from_db(&self.status)?,
            id: self.id,
            study_id: self.study_id,
            label: self.label,
            secondary_label: self.secondary_label,
            person_id: self.person_id,
            gender: self.gender,
            date_of_birth: self.date_of_birth,
            site_id: self.site_id,
            enrolled_at: self.enrolled_at,
            created_by: self.created_by,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::visit_instances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct VisitInstanceDB {
    pub id: String,
    pub subject_id: String,
    pub visit_definition_id: String,
    pub occurrence: i32,
    pub status: String,
    pub scheduled_at: Option<String>,
    pub location: Option<String>,
    pub created_at: String,
    pub created_by: String,
}

impl VisitInstanceDB {
    pub fn into_domain(self) -> Result<VisitInstance> {
        Ok(VisitInstance {
            status: enum_from_db(&self.status)?,
            id: self.id,
            subject_id: self.subject_id,
            visit_definition_id: self.visit_definition_id,
            occurrence: self.occurrence,
            scheduled_at: self.scheduled_at,
            location: self.location,
            created_at: self.created_at,
            created_by: self.created_by,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::form_instances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct FormInstanceDB {
    pub id: String,
    pub visit_instance_id: String,
    pub form_assignment_id: String,
    pub status: String,
    pub interviewer_name: Option<String>,
    pub interview_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
}

impl FormInstanceDB {
    pub fn into_domain(self) -> Result<FormInstance> {
        Ok(FormInstance {
            status: enum_from_db(&self.status)?,
            id: self.id,
            visit_instance_id: self.visit_instance_id,
            form_assignment_id: self.form_assignment_id,
            interviewer_name: self.interviewer_name,
            interview_date: self.interview_date,
            created_at: self.created_at,
            created_by: self.created_by,
        })
    }
}
