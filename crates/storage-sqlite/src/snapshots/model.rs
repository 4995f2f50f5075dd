use diesel::prelude::*;

use edc_core::errors::Result;
use edc_core::snapshots::{FieldList, FormSnapshot};

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::form_snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormSnapshotDB {
    pub id: String,
    pub form_instance_id: String,
    pub version_id: String,
    pub field_count: i32,
    /// JSON array of `SnapshotField`.
    pub fields: String,
    /// JSON object keyed by field name.
    pub answers: String,
    pub captured_at: String,
    pub captured_by: String,
}

impl FormSnapshotDB {
    pub fn capture(
        id: String,
        form_instance_id: &str,
        field_list: &FieldList,
        answers: String,
        captured_at: String,
        captured_by: &str,
    ) -> Result<Self> {
        Ok(Self {
            id,
            form_instance_id: form_instance_id.to_string(),
            version_id: field_list.version_id.clone(),
            field_count: field_list.field_count(),
            fields: serde_json::to_string(&field_list.fields)?,
            answers,
            captured_at,
            captured_by: captured_by.to_string(),
        })
    }

    pub fn into_domain(self) -> Result<FormSnapshot> {
        Ok(FormSnapshot {
            fields: serde_json::from_str(&self.fields)?,
            answers: serde_json::from_str(&self.answers)?,
            id: self.id,
            form_instance_id: self.form_instance_id,
            version_id: self.version_id,
            field_count: self.field_count,
            captured_at: self.captured_at,
            captured_by: self.captured_by,
        })
    }
}

#[derive(QueryableByName, Debug)]
pub struct SubjectSnapshotCountRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub subject_id: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub label: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub form_instances: i64,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub snapshots: i64,
}
