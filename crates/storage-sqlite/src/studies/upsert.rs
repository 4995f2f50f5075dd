//! Insert-or-update of nested definition records, keyed by caller ids.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use serde_json::Value;

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result, SnapshotError, ValidationError};
use edc_core::studies::{
    FormAssignmentInput, GroupClassInput, GroupInput, RecordStatus, SiteInput,
    VisitDefinitionInput,
};

use super::model::{FormAssignmentDB, GroupClassDB, SiteDB, StudyGroupDB, VisitDefinitionDB};
use crate::db::{enum_to_db, new_id, SchemaCapabilities};
use crate::errors::StorageError;
use crate::schema::{
    form_assignments, form_template_versions, group_classes, sites, study_groups,
    visit_definitions,
};
use crate::templates::resolve_default_version_tx;

/// Who and when for every row written during one synchronization.
pub(crate) struct UpsertContext {
    pub actor: String,
    pub now: String,
    pub caps: SchemaCapabilities,
}

/// Final ids in input order plus the audit intents for what was written.
#[derive(Debug, Default)]
pub(crate) struct Upserted {
    pub ids: Vec<String>,
    pub audits: Vec<NewAuditEntry>,
}

pub(crate) trait NestedTable {
    type Input;
    const ENTITY: AuditEntity;

    fn input_id(input: &Self::Input) -> Option<&str>;

    /// Current row as JSON if `id` exists under `parent_id`.
    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>>;

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value>;

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value>;
}

/// Updates records that carry a known id and inserts the rest. A record
/// whose id is unknown under `parent_id` is inserted with a fresh id.
pub(crate) fn upsert_nested<T: NestedTable>(
    conn: &mut SqliteConnection,
    parent_id: &str,
    inputs: &[T::Input],
    ctx: &UpsertContext,
) -> Result<Upserted> {
    let mut out = Upserted::default();
    for input in inputs {
        let requested = T::input_id(input).map(str::trim).filter(|id| !id.is_empty());
        let existing = match requested {
            Some(id) => T::find(conn, id, parent_id)?.map(|old| (id, old)),
            None => None,
        };

        match existing {
            Some((id, old)) => {
                let new = T::update(conn, id, input, ctx)?;
                out.audits.push(
                    NewAuditEntry::new(&ctx.actor, T::ENTITY, id, AuditAction::Update)
                        .with_values(Some(old), Some(new)),
                );
                out.ids.push(id.to_string());
            }
            None => {
                let id = new_id();
                let new = T::insert(conn, &id, parent_id, input, ctx)?;
                let mut entry = NewAuditEntry::new(&ctx.actor, T::ENTITY, &id, AuditAction::Create)
                    .with_values(None, Some(new));
                if let Some(requested) = requested {
                    warn!(
                        "{:?} '{}' not found under '{}'; inserted as '{}'",
                        T::ENTITY,
                        requested,
                        parent_id,
                        id
                    );
                    entry = entry.with_reason(format!("requested id '{}' not found", requested));
                }
                out.audits.push(entry);
                out.ids.push(id);
            }
        }
    }
    Ok(out)
}

fn row_json<R: serde::Serialize>(row: &R) -> Result<Value> {
    Ok(serde_json::to_value(row)?)
}

fn active_status() -> Result<String> {
    enum_to_db(&RecordStatus::Active)
}

// ─────────────────────────────────────────────────────────────────────────────
// Visit definitions
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct VisitDefinitions;

fn find_visit(conn: &mut SqliteConnection, id: &str) -> Result<VisitDefinitionDB> {
    Ok(visit_definitions::table
        .find(id)
        .select(VisitDefinitionDB::as_select())
        .first::<VisitDefinitionDB>(conn)
        .map_err(StorageError::from)?)
}

impl NestedTable for VisitDefinitions {
    type Input = VisitDefinitionInput;
    const ENTITY: AuditEntity = AuditEntity::VisitDefinition;

    fn input_id(input: &Self::Input) -> Option<&str> {
        input.id.as_deref()
    }

    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>> {
        let row = visit_definitions::table
            .filter(visit_definitions::id.eq(id))
            .filter(visit_definitions::study_id.eq(parent_id))
            .select(VisitDefinitionDB::as_select())
            .first::<VisitDefinitionDB>(conn)
            .optional()
            .map_err(StorageError::from)?;
        row.as_ref().map(row_json).transpose()
    }

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        diesel::update(visit_definitions::table.find(id))
            .set((
                visit_definitions::name.eq(&input.name),
                visit_definitions::description.eq(&input.description),
                visit_definitions::ordinal.eq(input.ordinal),
                visit_definitions::repeating.eq(input.repeating),
                visit_definitions::visit_type.eq(enum_to_db(&input.visit_type)?),
                visit_definitions::category.eq(&input.category),
                visit_definitions::target_day.eq(input.target_day),
                visit_definitions::earliest_day.eq(input.earliest_day),
                visit_definitions::latest_day.eq(input.latest_day),
                visit_definitions::updated_at.eq(&ctx.now),
                visit_definitions::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        row_json(&find_visit(conn, id)?)
    }

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let row = VisitDefinitionDB {
            id: id.to_string(),
            study_id: parent_id.to_string(),
            name: input.name.clone(),
            description: input.description.clone(),
            ordinal: input.ordinal,
            repeating: input.repeating,
            visit_type: enum_to_db(&input.visit_type)?,
            category: input.category.clone(),
            target_day: input.target_day,
            earliest_day: input.earliest_day,
            latest_day: input.latest_day,
            status: active_status()?,
            created_at: ctx.now.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(visit_definitions::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Form assignments
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct FormAssignments;

/// Explicit version when given (it must belong to the template), otherwise
/// the template's highest active version.
fn assignment_version(conn: &mut SqliteConnection, input: &FormAssignmentInput) -> Result<String> {
    if let Some(version_id) = input.default_version_id.as_deref().filter(|v| !v.is_empty()) {
        let owner = form_template_versions::table
            .find(version_id)
            .select(form_template_versions::template_id)
            .first::<String>(conn)
            .optional()
            .map_err(StorageError::from)?;
        return match owner {
            Some(template_id) if template_id == input.form_template_id => Ok(version_id.to_string()),
            Some(template_id) => Err(ValidationError::InvalidInput(format!(
                "version '{}' belongs to template '{}', not '{}'",
                version_id, template_id, input.form_template_id
            ))
            .into()),
            None => Err(Error::not_found("template version", version_id)),
        };
    }
    resolve_default_version_tx(conn, &input.form_template_id)?.ok_or_else(|| {
        SnapshotError::NoActiveVersion(input.form_template_id.clone()).into()
    })
}

fn write_assignment_extras(
    conn: &mut SqliteConnection,
    id: &str,
    input: &FormAssignmentInput,
    ctx: &UpsertContext,
) -> Result<()> {
    if !input.has_extras() {
        return Ok(());
    }
    if !ctx.caps.form_assignment_extras {
        debug!(
            "Assignment '{}' settings not stored: schema lacks extended columns",
            id
        );
        return Ok(());
    }
    diesel::update(form_assignments::table.find(id))
        .set((
            form_assignments::hide_form.eq(input.hide_form.unwrap_or(false)),
            form_assignments::sdv_code.eq(&input.sdv_code),
            form_assignments::participant_form.eq(input.participant_form.unwrap_or(false)),
        ))
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

fn assignment_json(
    conn: &mut SqliteConnection,
    id: &str,
    input: &FormAssignmentInput,
    ctx: &UpsertContext,
) -> Result<Value> {
    let row = form_assignments::table
        .find(id)
        .select(FormAssignmentDB::as_select())
        .first::<FormAssignmentDB>(conn)
        .map_err(StorageError::from)?;
    let mut value = row_json(&row)?;
    if ctx.caps.form_assignment_extras && input.has_extras() {
        if let Value::Object(map) = &mut value {
            map.insert("hide_form".into(), Value::from(input.hide_form.unwrap_or(false)));
            map.insert("sdv_code".into(), serde_json::to_value(&input.sdv_code)?);
            map.insert(
                "participant_form".into(),
                Value::from(input.participant_form.unwrap_or(false)),
            );
        }
    }
    Ok(value)
}

impl NestedTable for FormAssignments {
    type Input = FormAssignmentInput;
    const ENTITY: AuditEntity = AuditEntity::FormAssignment;

    fn input_id(input: &Self::Input) -> Option<&str> {
        input.id.as_deref()
    }

    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>> {
        let row = form_assignments::table
            .filter(form_assignments::id.eq(id))
            .filter(form_assignments::visit_definition_id.eq(parent_id))
            .select(FormAssignmentDB::as_select())
            .first::<FormAssignmentDB>(conn)
            .optional()
            .map_err(StorageError::from)?;
        row.as_ref().map(row_json).transpose()
    }

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let version_id = assignment_version(conn, input)?;
        diesel::update(form_assignments::table.find(id))
            .set((
                form_assignments::form_template_id.eq(&input.form_template_id),
                form_assignments::default_version_id.eq(&version_id),
                form_assignments::required.eq(input.required),
                form_assignments::double_entry.eq(input.double_entry),
                form_assignments::electronic_signature.eq(input.electronic_signature),
                form_assignments::ordinal.eq(input.ordinal),
                form_assignments::updated_at.eq(&ctx.now),
                form_assignments::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        write_assignment_extras(conn, id, input, ctx)?;
        assignment_json(conn, id, input, ctx)
    }

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let row = FormAssignmentDB {
            id: id.to_string(),
            visit_definition_id: parent_id.to_string(),
            form_template_id: input.form_template_id.clone(),
            default_version_id: assignment_version(conn, input)?,
            required: input.required,
            double_entry: input.double_entry,
            electronic_signature: input.electronic_signature,
            ordinal: input.ordinal,
            status: active_status()?,
            created_at: ctx.now.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(form_assignments::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        write_assignment_extras(conn, id, input, ctx)?;
        assignment_json(conn, id, input, ctx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Group classes and groups
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct GroupClasses;

impl NestedTable for GroupClasses {
    type Input = GroupClassInput;
    const ENTITY: AuditEntity = AuditEntity::GroupClass;

    fn input_id(input: &Self::Input) -> Option<&str> {
        input.id.as_deref()
    }

    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>> {
        let row = group_classes::table
            .filter(group_classes::id.eq(id))
            .filter(group_classes::study_id.eq(parent_id))
            .select(GroupClassDB::as_select())
            .first::<GroupClassDB>(conn)
            .optional()
            .map_err(StorageError::from)?;
        row.as_ref().map(row_json).transpose()
    }

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        diesel::update(group_classes::table.find(id))
            .set((
                group_classes::name.eq(&input.name),
                group_classes::class_type.eq(enum_to_db(&input.class_type)?),
                group_classes::subject_assignment.eq(enum_to_db(&input.subject_assignment)?),
                group_classes::updated_at.eq(&ctx.now),
                group_classes::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        let row = group_classes::table
            .find(id)
            .select(GroupClassDB::as_select())
            .first::<GroupClassDB>(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let row = GroupClassDB {
            id: id.to_string(),
            study_id: parent_id.to_string(),
            name: input.name.clone(),
            class_type: enum_to_db(&input.class_type)?,
            subject_assignment: enum_to_db(&input.subject_assignment)?,
            status: active_status()?,
            created_at: ctx.now.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(group_classes::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }
}

pub(crate) struct StudyGroups;

impl NestedTable for StudyGroups {
    type Input = GroupInput;
    const ENTITY: AuditEntity = AuditEntity::Group;

    fn input_id(input: &Self::Input) -> Option<&str> {
        input.id.as_deref()
    }

    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>> {
        let row = study_groups::table
            .filter(study_groups::id.eq(id))
            .filter(study_groups::group_class_id.eq(parent_id))
            .select(StudyGroupDB::as_select())
            .first::<StudyGroupDB>(conn)
            .optional()
            .map_err(StorageError::from)?;
        row.as_ref().map(row_json).transpose()
    }

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        diesel::update(study_groups::table.find(id))
            .set((
                study_groups::name.eq(&input.name),
                study_groups::description.eq(&input.description),
                study_groups::updated_at.eq(&ctx.now),
                study_groups::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        let row = study_groups::table
            .find(id)
            .select(StudyGroupDB::as_select())
            .first::<StudyGroupDB>(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let row = StudyGroupDB {
            id: id.to_string(),
            group_class_id: parent_id.to_string(),
            name: input.name.clone(),
            description: input.description.clone(),
            status: active_status()?,
            created_at: ctx.now.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(study_groups::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sites
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Sites;

impl NestedTable for Sites {
    type Input = SiteInput;
    const ENTITY: AuditEntity = AuditEntity::Site;

    fn input_id(input: &Self::Input) -> Option<&str> {
        input.id.as_deref()
    }

    fn find(conn: &mut SqliteConnection, id: &str, parent_id: &str) -> Result<Option<Value>> {
        let row = sites::table
            .filter(sites::id.eq(id))
            .filter(sites::study_id.eq(parent_id))
            .select(SiteDB::as_select())
            .first::<SiteDB>(conn)
            .optional()
            .map_err(StorageError::from)?;
        row.as_ref().map(row_json).transpose()
    }

    fn update(
        conn: &mut SqliteConnection,
        id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        diesel::update(sites::table.find(id))
            .set((
                sites::unique_identifier.eq(&input.unique_identifier),
                sites::name.eq(&input.name),
                sites::principal_investigator.eq(&input.principal_investigator),
                sites::expected_enrollment.eq(input.expected_enrollment),
                sites::updated_at.eq(&ctx.now),
                sites::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        let row = sites::table
            .find(id)
            .select(SiteDB::as_select())
            .first::<SiteDB>(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }

    fn insert(
        conn: &mut SqliteConnection,
        id: &str,
        parent_id: &str,
        input: &Self::Input,
        ctx: &UpsertContext,
    ) -> Result<Value> {
        let row = SiteDB {
            id: id.to_string(),
            study_id: parent_id.to_string(),
            unique_identifier: input.unique_identifier.clone(),
            name: input.name.clone(),
            principal_investigator: input.principal_investigator.clone(),
            expected_enrollment: input.expected_enrollment,
            status: active_status()?,
            created_at: ctx.now.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(sites::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        row_json(&row)
    }
}
