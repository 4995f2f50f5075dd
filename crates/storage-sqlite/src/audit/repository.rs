use std::sync::Arc;

use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;

use edc_core::audit::{AuditEntity, AuditEntry, AuditRepositoryTrait, NewAuditEntry};
use edc_core::errors::{Error, Result};

use super::model::{AuditLogDB, NewAuditLogDB};
use crate::db::{enum_from_db, enum_to_db, get_connection};
use crate::errors::StorageError;
use crate::schema::audit_log;

fn json_to_db(value: Option<serde_json::Value>) -> Result<Option<String>> {
    value.map(|v| serde_json::to_string(&v)).transpose().map_err(Error::from)
}

fn json_from_db(value: Option<String>) -> Result<Option<serde_json::Value>> {
    value
        .map(|v| serde_json::from_str(&v))
        .transpose()
        .map_err(Error::from)
}

/// Appends one entry on the caller's connection so it shares the caller's
/// transaction or savepoint.
pub fn write_audit(conn: &mut SqliteConnection, entry: NewAuditEntry) -> Result<i64> {
    let row = NewAuditLogDB {
        actor: entry.actor,
        occurred_at: entry.occurred_at,
        entity_type: enum_to_db(&entry.entity)?,
        entity_id: entry.entity_id,
        action: enum_to_db(&entry.action)?,
        old_value: json_to_db(entry.old_value)?,
        new_value: json_to_db(entry.new_value)?,
        reason: entry.reason,
    };
    let seq = diesel::insert_into(audit_log::table)
        .values(&row)
        .returning(audit_log::seq)
        .get_result::<i64>(conn)
        .map_err(|e| Error::Audit(e.to_string()))?;
    Ok(seq)
}

fn to_audit_entry(row: AuditLogDB) -> Result<AuditEntry> {
    Ok(AuditEntry {
        seq: row.seq,
        actor: row.actor,
        occurred_at: row.occurred_at,
        entity: enum_from_db(&row.entity_type)?,
        entity_id: row.entity_id,
        action: enum_from_db(&row.action)?,
        old_value: json_from_db(row.old_value)?,
        new_value: json_from_db(row.new_value)?,
        reason: row.reason,
    })
}

pub struct AuditRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl AuditRepository {
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }
}

impl AuditRepositoryTrait for AuditRepository {
    fn list_audit_entries(&self, entity: AuditEntity, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = audit_log::table
            .filter(audit_log::entity_type.eq(enum_to_db(&entity)?))
            .filter(audit_log::entity_id.eq(entity_id))
            .order(audit_log::seq.asc())
            .select(AuditLogDB::as_select())
            .load::<AuditLogDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_audit_entry).collect()
    }
}
