use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result, ValidationError};
use edc_core::templates::{
    template_oid, FormTemplate, FormTemplateRepositoryTrait, FormTemplateVersion, NewFormTemplate,
    NewTemplateField, NewTemplateVersion, TemplateField, VersionStatus,
};

use super::model::{FormTemplateDB, FormTemplateVersionDB, TemplateFieldDB};
use crate::audit::write_audit;
use crate::db::{enum_to_db, get_connection, new_id, now_rfc3339, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{form_template_versions, form_templates, template_fields};

pub(crate) fn find_version(
    conn: &mut SqliteConnection,
    version_id: &str,
) -> Result<Option<FormTemplateVersion>> {
    form_template_versions::table
        .find(version_id)
        .select(FormTemplateVersionDB::as_select())
        .first::<FormTemplateVersionDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(FormTemplateVersionDB::into_domain)
        .transpose()
}

pub(crate) fn load_fields(
    conn: &mut SqliteConnection,
    version_id: &str,
) -> Result<Vec<TemplateField>> {
    let rows = template_fields::table
        .filter(template_fields::version_id.eq(version_id))
        .order((template_fields::ordinal.asc(), template_fields::name.asc()))
        .select(TemplateFieldDB::as_select())
        .load::<TemplateFieldDB>(conn)
        .map_err(StorageError::from)?;
    Ok(rows.into_iter().map(TemplateField::from).collect())
}

/// Highest-numbered active version of `template_id`.
pub(crate) fn resolve_default_version_tx(
    conn: &mut SqliteConnection,
    template_id: &str,
) -> Result<Option<String>> {
    let active = enum_to_db(&VersionStatus::Active)?;
    let version_id = form_template_versions::table
        .filter(form_template_versions::template_id.eq(template_id))
        .filter(form_template_versions::status.eq(active))
        .order(form_template_versions::version_number.desc())
        .select(form_template_versions::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(version_id)
}

fn field_row(version_id: &str, field: NewTemplateField, now: &str) -> Result<TemplateFieldDB> {
    if field.name.trim().is_empty() {
        return Err(ValidationError::MissingField("field.name").into());
    }
    let options = if field.options.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&field.options)?)
    };
    Ok(TemplateFieldDB {
        id: new_id(),
        version_id: version_id.to_string(),
        name: field.name,
        label: field.label,
        field_type: enum_to_db(&field.field_type)?,
        required: field.required,
        options,
        ordinal: field.ordinal,
        section: field.section,
        created_at: now.to_string(),
    })
}

pub struct FormTemplateRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl FormTemplateRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl FormTemplateRepositoryTrait for FormTemplateRepository {
    async fn create_template(
        &self,
        new_template: NewFormTemplate,
        actor: String,
    ) -> Result<FormTemplate> {
        if new_template.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name").into());
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormTemplate> {
                let now = now_rfc3339();
                let row = FormTemplateDB {
                    id: new_id(),
                    oid: new_template
                        .oid
                        .filter(|oid| !oid.trim().is_empty())
                        .unwrap_or_else(|| template_oid(&new_template.name)),
                    name: new_template.name,
                    description: new_template.description,
                    created_at: now.clone(),
                    updated_at: now,
                };
                diesel::insert_into(form_templates::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(&actor, AuditEntity::FormTemplate, &row.id, AuditAction::Create)
                        .with_values(None, Some(serde_json::json!({ "oid": row.oid, "name": row.name }))),
                )?;
                Ok(FormTemplate::from(row))
            })
            .await
    }

    async fn add_version(
        &self,
        template_id: String,
        new_version: NewTemplateVersion,
        actor: String,
    ) -> Result<FormTemplateVersion> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormTemplateVersion> {
                let exists = form_templates::table
                    .find(&template_id)
                    .select(form_templates::id)
                    .first::<String>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                if exists.is_none() {
                    return Err(Error::not_found("form template", template_id));
                }

                let current: Option<i32> = form_template_versions::table
                    .filter(form_template_versions::template_id.eq(&template_id))
                    .select(max(form_template_versions::version_number))
                    .first(conn)
                    .map_err(StorageError::from)?;
                let now = now_rfc3339();
                let row = FormTemplateVersionDB {
                    id: new_id(),
                    template_id: template_id.clone(),
                    version_number: current.unwrap_or(0) + 1,
                    name: new_version.name,
                    status: enum_to_db(&VersionStatus::Active)?,
                    revision_notes: new_version.revision_notes,
                    created_at: now.clone(),
                    created_by: actor.clone(),
                };
                diesel::insert_into(form_template_versions::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;

                let field_count = new_version.fields.len();
                let fields = new_version
                    .fields
                    .into_iter()
                    .map(|f| field_row(&row.id, f, &now))
                    .collect::<Result<Vec<_>>>()?;
                if !fields.is_empty() {
                    diesel::insert_into(template_fields::table)
                        .values(&fields)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                write_audit(
                    conn,
                    NewAuditEntry::new(
                        &actor,
                        AuditEntity::FormTemplateVersion,
                        &row.id,
                        AuditAction::Create,
                    )
                    .with_values(
                        None,
                        Some(serde_json::json!({
                            "templateId": template_id,
                            "versionNumber": row.version_number,
                            "fieldCount": field_count,
                        })),
                    ),
                )?;
                debug!(
                    "Template {} version {} created with {} field(s)",
                    template_id, row.version_number, field_count
                );
                row.into_domain()
            })
            .await
    }

    async fn add_field(
        &self,
        version_id: String,
        field: NewTemplateField,
        actor: String,
    ) -> Result<TemplateField> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<TemplateField> {
                if find_version(conn, &version_id)?.is_none() {
                    return Err(Error::not_found("template version", version_id));
                }
                let row = field_row(&version_id, field, &now_rfc3339())?;
                diesel::insert_into(template_fields::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(
                        &actor,
                        AuditEntity::FormTemplateVersion,
                        &version_id,
                        AuditAction::Update,
                    )
                    .with_values(None, Some(serde_json::json!({ "addedField": row.name })))
                    .with_reason("field added"),
                )?;
                Ok(TemplateField::from(row))
            })
            .await
    }

    async fn set_version_status(
        &self,
        version_id: String,
        status: VersionStatus,
        actor: String,
    ) -> Result<FormTemplateVersion> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<FormTemplateVersion> {
                let Some(before) = find_version(conn, &version_id)? else {
                    return Err(Error::not_found("template version", version_id));
                };
                diesel::update(form_template_versions::table.find(&version_id))
                    .set(form_template_versions::status.eq(enum_to_db(&status)?))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_audit(
                    conn,
                    NewAuditEntry::new(
                        &actor,
                        AuditEntity::FormTemplateVersion,
                        &version_id,
                        AuditAction::Update,
                    )
                    .with_values(
                        Some(serde_json::json!({ "status": before.status })),
                        Some(serde_json::json!({ "status": status })),
                    ),
                )?;
                Ok(FormTemplateVersion { status, ..before })
            })
            .await
    }

    fn get_version(&self, version_id: &str) -> Result<Option<FormTemplateVersion>> {
        let mut conn = get_connection(&self.pool)?;
        find_version(&mut conn, version_id)
    }

    fn list_fields(&self, version_id: &str) -> Result<Vec<TemplateField>> {
        let mut conn = get_connection(&self.pool)?;
        load_fields(&mut conn, version_id)
    }

    fn resolve_default_version(&self, template_id: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        resolve_default_version_tx(&mut conn, template_id)
    }
}
