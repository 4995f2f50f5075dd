//! One synchronization of a study definition graph, run inside the writer's
//! top-level transaction.


use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info};

use edc_core::audit::{AuditAction, AuditEntity, NewAuditEntry};
use edc_core::errors::{Error, Result};
use edc_core::parameters::{resolves_to, NormalizedParameters};
use edc_core::studies::{StudyStatus, StudySyncRequest, SyncOutcome, SyncStep};

use super::model::{StudyDB, StudyParameterDB};
use super::pipeline::StepPipeline;
use super::upsert::{
    upsert_nested, FormAssignments, GroupClasses, Sites, StudyGroups, UpsertContext, Upserted,
    VisitDefinitions,
};
use crate::audit::write_audit;
use crate::db::{enum_to_db, new_id, now_rfc3339, SchemaCapabilities};
use crate::errors::StorageError;
use crate::schema::{studies, study_parameters, subjects};

/// Fails when another study already uses `identifier`.
fn check_identity(
    conn: &mut SqliteConnection,
    identifier: &str,
    own_id: Option<&str>,
) -> Result<()> {
    let mut query = studies::table
        .filter(studies::unique_identifier.eq(identifier))
        .select(studies::id)
        .into_boxed();
    if let Some(own_id) = own_id {
        query = query.filter(studies::id.ne(own_id.to_string()));
    }
    let clash = query
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    match clash {
        Some(_) => Err(Error::IdentityConflict(identifier.to_string())),
        None => Ok(()),
    }
}

fn write_primary(
    conn: &mut SqliteConnection,
    request: &StudySyncRequest,
    now: &str,
) -> Result<(String, bool)> {
    let def = &request.definition;
    let identifier = def.unique_identifier.trim().to_string();
    let existing_id = def
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    check_identity(conn, &identifier, existing_id)?;

    match existing_id {
        None => {
            let row = StudyDB {
                id: new_id(),
                unique_identifier: identifier,
                name: def.name.clone(),
                summary: def.summary.clone(),
                principal_investigator: def.principal_investigator.clone(),
                sponsor: def.sponsor.clone(),
                status: enum_to_db(&def.status.unwrap_or(StudyStatus::Active))?,
                owner: request.actor.clone(),
                created_at: now.to_string(),
                updated_at: now.to_string(),
                updated_by: None,
            };
            diesel::insert_into(studies::table)
                .values(&row)
                .execute(conn)
                .map_err(StorageError::from)?;
            write_audit(
                conn,
                NewAuditEntry::new(&request.actor, AuditEntity::Study, &row.id, AuditAction::Create)
                    .with_values(None, Some(serde_json::to_value(&row)?)),
            )?;
            Ok((row.id, true))
        }
        Some(study_id) => {
            let before = studies::table
                .find(study_id)
                .select(StudyDB::as_select())
                .first::<StudyDB>(conn)
                .optional()
                .map_err(StorageError::from)?
                .ok_or_else(|| Error::not_found("study", study_id))?;

            if before.unique_identifier != identifier {
                let enrolled: i64 = subjects::table
                    .filter(subjects::study_id.eq(study_id))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if enrolled > 0 {
                    return Err(Error::ImmutableIdentifier {
                        study_id: study_id.to_string(),
                        enrolled,
                    });
                }
            }

            let after = StudyDB {
                id: before.id.clone(),
                unique_identifier: identifier,
                name: def.name.clone(),
                summary: def.summary.clone(),
                principal_investigator: def.principal_investigator.clone(),
                sponsor: def.sponsor.clone(),
                status: match def.status {
                    Some(status) => enum_to_db(&status)?,
                    None => before.status.clone(),
                },
                owner: before.owner.clone(),
                created_at: before.created_at.clone(),
                updated_at: now.to_string(),
                updated_by: Some(request.actor.clone()),
            };
            diesel::update(studies::table.find(study_id))
                .set(&after)
                .execute(conn)
                .map_err(StorageError::from)?;
            write_audit(
                conn,
                NewAuditEntry::new(&request.actor, AuditEntity::Study, study_id, AuditAction::Update)
                    .with_values(
                        Some(serde_json::to_value(&before)?),
                        Some(serde_json::to_value(&after)?),
                    ),
            )?;
            Ok((after.id, false))
        }
    }
}

/// Upserts one row per canonical key and removes rows stored under alias
/// spellings of those keys.
fn sync_parameters(
    conn: &mut SqliteConnection,
    study_id: &str,
    parameters: &NormalizedParameters,
    ctx: &UpsertContext,
) -> Result<Vec<NewAuditEntry>> {
    let mut audits = Vec::new();
    for (name, value) in parameters.iter() {
        let old = study_parameters::table
            .find((study_id, name.as_str()))
            .select(study_parameters::value)
            .first::<String>(conn)
            .optional()
            .map_err(StorageError::from)?;
        if old.as_deref() == Some(value.as_str()) {
            continue;
        }

        let row = StudyParameterDB {
            study_id: study_id.to_string(),
            name: name.clone(),
            value: value.clone(),
            updated_at: ctx.now.clone(),
            updated_by: ctx.actor.clone(),
        };
        diesel::insert_into(study_parameters::table)
            .values(&row)
            .on_conflict((study_parameters::study_id, study_parameters::name))
            .do_update()
            .set((
                study_parameters::value.eq(value),
                study_parameters::updated_at.eq(&ctx.now),
                study_parameters::updated_by.eq(&ctx.actor),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;

        let action = if old.is_some() {
            AuditAction::Update
        } else {
            AuditAction::Create
        };
        audits.push(
            NewAuditEntry::new(&ctx.actor, AuditEntity::StudyParameter, study_id, action)
                .with_values(
                    old.map(|v| serde_json::json!({ "name": name, "value": v })),
                    Some(serde_json::json!({ "name": name, "value": value })),
                ),
        );
    }

    // Older rows may use any spelling the normalizer folds onto a key.
    let stored = study_parameters::table
        .filter(study_parameters::study_id.eq(study_id))
        .select((study_parameters::name, study_parameters::value))
        .load::<(String, String)>(conn)
        .map_err(StorageError::from)?;
    for (spelling, old) in stored {
        if parameters.get(&spelling).is_some() {
            continue;
        }
        let Some(canonical) = resolves_to(&spelling) else { continue };
        if parameters.get(canonical).is_none() {
            continue;
        }
        diesel::delete(study_parameters::table.find((study_id, spelling.as_str())))
            .execute(conn)
            .map_err(StorageError::from)?;
        debug!(
            "Removed parameter row '{}' of study {}, superseded by '{}'",
            spelling, study_id, canonical
        );
        audits.push(
            NewAuditEntry::new(&ctx.actor, AuditEntity::StudyParameter, study_id, AuditAction::Delete)
                .with_values(Some(serde_json::json!({ "name": spelling, "value": old })), None)
                .with_reason("superseded by canonical parameter"),
        );
    }
    Ok(audits)
}

fn merge(into: &mut Vec<NewAuditEntry>, upserted: Upserted) -> Vec<String> {
    into.extend(upserted.audits);
    upserted.ids
}

/// Runs the whole synchronization on `conn`, which must already be inside
/// a transaction. Errors returned from here abort that transaction.
pub(crate) fn synchronize_study_tx(
    conn: &mut SqliteConnection,
    request: StudySyncRequest,
    caps: SchemaCapabilities,
) -> Result<SyncOutcome> {
    let now = now_rfc3339();
    let (study_id, created) = write_primary(conn, &request, &now)?;

    let ctx = UpsertContext {
        actor: request.actor.clone(),
        now,
        caps,
    };
    let def = &request.definition;
    let mut pipeline = StepPipeline::after_primary_write();
    let mut pending: Vec<NewAuditEntry> = Vec::new();

    if let Some(audits) = pipeline.run(conn, SyncStep::Parameters, |sp| {
        sync_parameters(sp, &study_id, &request.parameters, &ctx)
    }) {
        pending.extend(audits);
    }

    let visit_definition_ids = pipeline
        .run(conn, SyncStep::VisitDefinitions, |sp| {
            let visits =
                upsert_nested::<VisitDefinitions>(sp, &study_id, &def.visit_definitions, &ctx)?;
            let mut audits = visits.audits;
            for (input, visit_id) in def.visit_definitions.iter().zip(&visits.ids) {
                let assignments =
                    upsert_nested::<FormAssignments>(sp, visit_id, &input.form_assignments, &ctx)?;
                audits.extend(assignments.audits);
            }
            Ok(Upserted {
                ids: visits.ids,
                audits,
            })
        })
        .map(|upserted| merge(&mut pending, upserted))
        .unwrap_or_default();

    let group_class_ids = pipeline
        .run(conn, SyncStep::GroupClasses, |sp| {
            let classes =
                upsert_nested::<GroupClasses>(sp, &study_id, &def.group_classes, &ctx)?;
            let mut audits = classes.audits;
            for (input, class_id) in def.group_classes.iter().zip(&classes.ids) {
                let groups = upsert_nested::<StudyGroups>(sp, class_id, &input.groups, &ctx)?;
                audits.extend(groups.audits);
            }
            Ok(Upserted {
                ids: classes.ids,
                audits,
            })
        })
        .map(|upserted| merge(&mut pending, upserted))
        .unwrap_or_default();

    let site_ids = pipeline
        .run(conn, SyncStep::Sites, |sp| {
            upsert_nested::<Sites>(sp, &study_id, &def.sites, &ctx)
        })
        .map(|upserted| merge(&mut pending, upserted))
        .unwrap_or_default();

    let failed_steps: Vec<&str> = pipeline.failed_steps().map(|step| step.label()).collect();
    pending.push(
        NewAuditEntry::new(&ctx.actor, AuditEntity::Study, &study_id, AuditAction::Synchronize)
            .with_values(
                None,
                Some(serde_json::json!({
                    "visitDefinitions": visit_definition_ids.len(),
                    "groupClasses": group_class_ids.len(),
                    "sites": site_ids.len(),
                    "failedSteps": failed_steps,
                })),
            ),
    );
    pipeline.log_audits(conn, pending);
    debug!("Study {} reached {:?}", study_id, pipeline.phase());
    let warnings = pipeline.finish();

    info!(
        "Study {} {} ({} warning(s))",
        study_id,
        if created { "created" } else { "updated" },
        warnings.len()
    );
    Ok(SyncOutcome {
        study_id,
        created,
        warnings,
        visit_definition_ids,
        group_class_ids,
        site_ids,
    })
}
