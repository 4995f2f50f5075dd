//! Turns a template version's authored fields into the frozen field list.

use std::collections::HashSet;

use crate::errors::SnapshotError;
use crate::templates::{FieldOption, FieldType, FormTemplateVersion, TemplateField};

use super::snapshots_model::{FieldList, SnapshotField};

fn malformed(field: &TemplateField, reason: impl Into<String>) -> SnapshotError {
    SnapshotError::MalformedField {
        field_id: field.id.clone(),
        reason: reason.into(),
    }
}

fn parse_field_type(field: &TemplateField) -> Result<FieldType, SnapshotError> {
    serde_json::from_value(serde_json::Value::String(field.field_type.clone()))
        .map_err(|_| malformed(field, format!("unknown field type '{}'", field.field_type)))
}

fn parse_options(
    field: &TemplateField,
    field_type: FieldType,
) -> Result<Option<Vec<FieldOption>>, SnapshotError> {
    let raw = field
        .options
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());

    let Some(raw) = raw else {
        if field_type.is_enumerated() {
            return Err(malformed(field, "enumerated field has no options"));
        }
        return Ok(None);
    };

    let options: Vec<FieldOption> = serde_json::from_str(raw)
        .map_err(|e| malformed(field, format!("options are not valid JSON: {}", e)))?;
    if field_type.is_enumerated() && options.is_empty() {
        return Err(malformed(field, "enumerated field has no options"));
    }
    Ok(Some(options))
}

/// Builds the field list for `version`.
///
/// Deterministic: fields are ordered by (ordinal, name, id) regardless of
/// input order, so the same version always yields the same list.
pub fn build_field_list(
    version: &FormTemplateVersion,
    fields: &[TemplateField],
) -> Result<FieldList, SnapshotError> {
    let mut seen_names = HashSet::with_capacity(fields.len());
    let mut built = Vec::with_capacity(fields.len());

    for field in fields {
        if field.version_id != version.id {
            return Err(malformed(
                field,
                format!("belongs to version '{}'", field.version_id),
            ));
        }
        if field.name.trim().is_empty() {
            return Err(malformed(field, "field name is empty"));
        }
        if !seen_names.insert(field.name.as_str()) {
            return Err(malformed(field, format!("duplicate field name '{}'", field.name)));
        }

        let field_type = parse_field_type(field)?;
        let options = parse_options(field, field_type)?;
        built.push(SnapshotField {
            field_id: field.id.clone(),
            name: field.name.clone(),
            label: field.label.clone(),
            field_type,
            required: field.required,
            options,
            ordinal: field.ordinal,
            section: field.section.clone(),
        });
    }

    built.sort_by(|a, b| {
        a.ordinal
            .cmp(&b.ordinal)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.field_id.cmp(&b.field_id))
    });

    Ok(FieldList {
        version_id: version.id.clone(),
        fields: built,
    })
}
