//! Row types for the study definition tables.

use diesel::prelude::*;
use serde::Serialize;

use edc_core::errors::Result;
use edc_core::studies::{
    FormAssignment, FormAssignmentExtras, Group, GroupClass, Site, VisitDefinition,
};

use crate::db::enum_from_db;

#[derive(Queryable, Selectable, Insertable, AsChangeset, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::studies)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct StudyDB {
    pub id: String,
    pub unique_identifier: String,
    pub name: String,
    pub summary: Option<String>,
    pub principal_investigator: Option<String>,
    pub sponsor: Option<String>,
    pub status: String,
    pub owner: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::study_parameters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StudyParameterDB {
    pub study_id: String,
    pub name: String,
    pub value: String,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::visit_definitions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VisitDefinitionDB {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub description: Option<String>,
    pub ordinal: i32,
    pub repeating: bool,
    pub visit_type: String,
    pub category: Option<String>,
    pub target_day: Option<i32>,
    pub earliest_day: Option<i32>,
    pub latest_day: Option<i32>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: String,
}

impl VisitDefinitionDB {
    pub fn into_domain(self, form_assignments: Vec<FormAssignment>) -> Result<VisitDefinition> {
        Ok(VisitDefinition {
            visit_type: enum_from_db(&self.visit_type)?,
            status: enum_from_db(&self.status)?,
            id: self.id,
            study_id: self.study_id,
            name: self.name,
            description: self.description,
            ordinal: self.ordinal,
            repeating: self.repeating,
            category: self.category,
            target_day: self.target_day,
            earliest_day: self.earliest_day,
            latest_day: self.latest_day,
            form_assignments,
        })
    }
}

/// Base columns only; the extended settings are read and written
/// separately when the schema has them.
#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::form_assignments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormAssignmentDB {
    pub id: String,
    pub visit_definition_id: String,
    pub form_template_id: String,
    pub default_version_id: String,
    pub required: bool,
    pub double_entry: bool,
    pub electronic_signature: bool,
    pub ordinal: i32,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: String,
}

impl FormAssignmentDB {
    pub fn into_domain(self, extras: Option<FormAssignmentExtras>) -> Result<FormAssignment> {
        Ok(FormAssignment {
            status: enum_from_db(&self.status)?,
            id: self.id,
            visit_definition_id: self.visit_definition_id,
            form_template_id: self.form_template_id,
            default_version_id: self.default_version_id,
            required: self.required,
            double_entry: self.double_entry,
            electronic_signature: self.electronic_signature,
            ordinal: self.ordinal,
            extras,
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::form_assignments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormAssignmentExtrasDB {
    pub id: String,
    pub hide_form: bool,
    pub sdv_code: Option<String>,
    pub participant_form: bool,
}

impl From<FormAssignmentExtrasDB> for FormAssignmentExtras {
    fn from(row: FormAssignmentExtrasDB) -> Self {
        Self {
            hide_form: row.hide_form,
            sdv_code: row.sdv_code,
            participant_form: row.participant_form,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::group_classes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GroupClassDB {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub class_type: String,
    pub subject_assignment: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: String,
}

impl GroupClassDB {
    pub fn into_domain(self, groups: Vec<Group>) -> Result<GroupClass> {
        Ok(GroupClass {
            class_type: enum_from_db(&self.class_type)?,
            subject_assignment: enum_from_db(&self.subject_assignment)?,
            status: enum_from_db(&self.status)?,
            id: self.id,
            study_id: self.study_id,
            name: self.name,
            groups,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::study_groups)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StudyGroupDB {
    pub id: String,
    pub group_class_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: String,
}

impl StudyGroupDB {
    pub fn into_domain(self) -> Result<Group> {
        Ok(Group {
            status: enum_from_db(&self.status)?,
            id: self.id,
            group_class_id: self.group_class_id,
            name: self.name,
            description: self.description,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::sites)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SiteDB {
    pub id: String,
    pub study_id: String,
    pub unique_identifier: String,
    pub name: String,
    pub principal_investigator: Option<String>,
    pub expected_enrollment: Option<i32>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: String,
}

impl SiteDB {
    pub fn into_domain(self) -> Result<Site> {
        Ok(Site {
            status: enum_from_db(&self.status)?,
            id: self.id,
            study_id: self.study_id,
            unique_identifier: self.unique_identifier,
            name: self.name,
            principal_investigator: self.principal_investigator,
            expected_enrollment: self.expected_enrollment,
        })
    }
}
