//! Optional-column detection. Probed once per repository instead of
//! attempting writes and catching failures.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info};

use edc_core::errors::Result;

use crate::errors::StorageError;

const FORM_ASSIGNMENT_EXTRA_COLUMNS: [&str; 3] = ["hide_form", "sdv_code", "participant_form"];

#[derive(diesel::QueryableByName)]
struct PragmaTableInfoRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

pub(crate) fn load_table_columns(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> Result<HashSet<String>> {
    let sql = format!("PRAGMA table_info('{}')", table_name.replace('\'', "''"));
    let columns = diesel::sql_query(sql)
        .load::<PragmaTableInfoRow>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .map(|row| row.name)
        .collect();
    Ok(columns)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaCapabilities {
    /// `hide_form`, `sdv_code` and `participant_form` on `form_assignments`.
    pub form_assignment_extras: bool,
}

impl SchemaCapabilities {
    pub fn probe(conn: &mut SqliteConnection) -> Result<Self> {
        let columns = load_table_columns(conn, "form_assignments")?;
        let form_assignment_extras = FORM_ASSIGNMENT_EXTRA_COLUMNS
            .iter()
            .all(|c| columns.contains(*c));
        if !form_assignment_extras {
            info!("form_assignments lacks extended columns; assignment settings will not be stored");
        }
        Ok(Self {
            form_assignment_extras,
        })
    }
}

/// Lazily probed, then fixed for the lifetime of the owner.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    cell: Arc<OnceLock<SchemaCapabilities>>,
}

impl CapabilityCache {
    pub fn get_or_probe(&self, conn: &mut SqliteConnection) -> Result<SchemaCapabilities> {
        if let Some(caps) = self.cell.get() {
            return Ok(*caps);
        }
        let caps = SchemaCapabilities::probe(conn)?;
        debug!("Schema capabilities: {:?}", caps);
        Ok(*self.cell.get_or_init(|| caps))
    }
}
