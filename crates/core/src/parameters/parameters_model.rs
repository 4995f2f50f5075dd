use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Delimiter used when a combined parameter is synthesized from its parts.
pub const COMBINED_PARAMETER_DELIMITER: &str = "|";

/// Value vocabulary a canonical parameter is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Free text, stored verbatim.
    Text,
    /// `"true"` / `"false"`.
    Flag,
    /// `"required"` / `"optional"` / `"not used"`.
    TriState,
    /// One stored value joined from several caller-side parts.
    Combined { parts: &'static [&'static str] },
}

/// One row of the alias table: a canonical key, the spellings that resolve
/// to it and the vocabulary its value is normalized into.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ParameterKind,
}

/// Canonical study parameters. Adding an alias is a change to this table only.
pub const PARAMETER_TABLE: &[ParameterSpec] = &[
    ParameterSpec {
        key: "collectDob",
        aliases: &["collectDateOfBirth"],
        kind: ParameterKind::Text,
    },
    ParameterSpec {
        key: "genderRequired",
        aliases: &["sexRequired"],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "subjectPersonIdRequired",
        aliases: &["personIdRequired"],
        kind: ParameterKind::TriState,
    },
    ParameterSpec {
        key: "subjectIdGeneration",
        aliases: &["studySubjectIdGeneration"],
        kind: ParameterKind::Text,
    },
    ParameterSpec {
        key: "subjectIdPrefixSuffix",
        aliases: &["subjectIdPrefixAndSuffix"],
        kind: ParameterKind::Combined {
            parts: &["subjectIdPrefix", "subjectIdSuffix"],
        },
    },
    ParameterSpec {
        key: "interviewerNameRequired",
        aliases: &[],
        kind: ParameterKind::TriState,
    },
    ParameterSpec {
        key: "interviewerNameDefault",
        aliases: &[],
        kind: ParameterKind::Text,
    },
    ParameterSpec {
        key: "interviewerNameEditable",
        aliases: &[],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "interviewDateRequired",
        aliases: &[],
        kind: ParameterKind::TriState,
    },
    ParameterSpec {
        key: "interviewDateDefault",
        aliases: &[],
        kind: ParameterKind::Text,
    },
    ParameterSpec {
        key: "interviewDateEditable",
        aliases: &[],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "personIdShownOnCRF",
        aliases: &["personIdShownOnCrf", "showPersonIdOnForm"],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "secondaryLabelViewable",
        aliases: &["secondaryIdViewable"],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "adminForcedReasonForChange",
        aliases: &["forcedReasonForChangeInAdministrativeEditing"],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "eventLocationRequired",
        aliases: &[],
        kind: ParameterKind::TriState,
    },
    ParameterSpec {
        key: "discrepancyManagement",
        aliases: &[],
        kind: ParameterKind::Flag,
    },
    ParameterSpec {
        key: "mailNotification",
        aliases: &[],
        kind: ParameterKind::Text,
    },
    ParameterSpec {
        key: "contactEmail",
        aliases: &[],
        kind: ParameterKind::Text,
    },
];

pub fn parameter_spec(key: &str) -> Option<&'static ParameterSpec> {
    PARAMETER_TABLE.iter().find(|spec| spec.key == key)
}

/// Parameters keyed exclusively by canonical names (plus unrecognized keys
/// passed through verbatim). Only the normalizer constructs this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedParameters(BTreeMap<String, String>);

impl NormalizedParameters {
    pub(crate) fn from_map(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}
