use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Integer,
    Real,
    Date,
    PartialDate,
    SingleSelect,
    MultiSelect,
    Radio,
    Checkbox,
    File,
    Calculation,
}

impl FieldType {
    /// Types whose answers are chosen from an option list.
    pub fn is_enumerated(&self) -> bool {
        matches!(
            self,
            FieldType::SingleSelect | FieldType::MultiSelect | FieldType::Radio | FieldType::Checkbox
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    #[default]
    Active,
    Retired,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: String,
    pub oid: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplateVersion {
    pub id: String,
    pub template_id: String,
    pub version_number: i32,
    pub name: String,
    pub status: VersionStatus,
    pub revision_notes: Option<String>,
    pub created_at: String,
}

/// A field as authored. `field_type` and `options` are kept as stored so
/// the snapshot builder can report rows it cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    pub id: String,
    pub version_id: String,
    pub name: String,
    pub label: Option<String>,
    pub field_type: String,
    pub required: bool,
    /// JSON array of `{value, label}` objects.
    pub options: Option<String>,
    pub ordinal: i32,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFormTemplate {
    /// Generated from the name when omitted.
    pub oid: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplateVersion {
    pub name: String,
    pub revision_notes: Option<String>,
    #[serde(default)]
    pub fields: Vec<NewTemplateField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplateField {
    pub name: String,
    pub label: Option<String>,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub options: Vec<FieldOption>,
    pub ordinal: i32,
    pub section: Option<String>,
}

impl NewTemplateField {
    pub fn new(name: impl Into<String>, field_type: FieldType, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            label: None,
            field_type,
            required: false,
            options: Vec::new(),
            ordinal,
            section: None,
        }
    }

    pub fn with_options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options
            .iter()
            .map(|(value, label)| FieldOption {
                value: value.to_string(),
                label: label.to_string(),
            })
            .collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Derives a template OID from its display name: `F_` plus the
/// alphanumeric characters, upper-cased.
pub fn template_oid(name: &str) -> String {
    let stem: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(24)
        .collect();
    format!("F_{}", stem)
}
