use diesel::prelude::*;

use edc_core::errors::Result;
use edc_core::templates::{FormTemplate, FormTemplateVersion, TemplateField};

use crate::db::enum_from_db;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::form_templates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormTemplateDB {
    pub id: String,
    pub oid: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FormTemplateDB> for FormTemplate {
    fn from(row: FormTemplateDB) -> Self {
        Self {
            id: row.id,
            oid: row.oid,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::form_template_versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormTemplateVersionDB {
    pub id: String,
    pub template_id: String,
    pub version_number: i32,
    pub name: String,
    pub status: String,
    pub revision_notes: Option<String>,
    pub created_at: String,
    pub created_by: String,
}

impl FormTemplateVersionDB {
    pub fn into_domain(self) -> Result<FormTemplateVersion> {
        Ok(FormTemplateVersion {
            status: enum_from_db(&self.status)?,
            id: self.id,
            template_id: self.template_id,
            version_number: self.version_number,
            name: self.name,
            revision_notes: self.revision_notes,
            created_at: self.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::template_fields)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TemplateFieldDB {
    pub id: String,
    pub version_id: String,
    pub name: String,
    pub label: Option<String>,
    pub field_type: String,
    pub required: bool,
    pub options: Option<String>,
    pub ordinal: i32,
    pub section: Option<String>,
    pub created_at: String,
}

impl From<TemplateFieldDB> for TemplateField {
    fn from(row: TemplateFieldDB) -> Self {
        Self {
            id: row.id,
            version_id: row.version_id,
            name: row.name,
            label: row.label,
            field_type: row.field_type,
            required: row.required,
            options: row.options,
            ordinal: row.ordinal,
            section: row.section,
        }
    }
}
