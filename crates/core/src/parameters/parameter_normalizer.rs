//! Rewrites caller-supplied parameter maps into canonical form.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde_json::Value;

use super::parameters_model::{
    NormalizedParameters, ParameterKind, ParameterSpec, COMBINED_PARAMETER_DELIMITER,
    PARAMETER_TABLE,
};

/// Lowercases and strips separators so `personIdShownOnCrf`,
/// `PERSON_ID_SHOWN_ON_CRF` and `personIdShownOnCRF` compare equal.
fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Canonical key that `name` resolves to, matching the canonical name, its
/// aliases and split parts in any case or separator variant.
pub fn resolves_to(name: &str) -> Option<&'static str> {
    let folded = fold_key(name);
    PARAMETER_TABLE.iter().find_map(|spec| {
        let parts: &[&str] = match spec.kind {
            ParameterKind::Combined { parts } => parts,
            _ => &[],
        };
        spec_names(spec)
            .iter()
            .chain(parts)
            .any(|candidate| fold_key(candidate) == folded)
            .then_some(spec.key)
    })
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn normalize_flag(value: &Value) -> String {
    match value {
        Value::Null => "false".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => (v.as_f64().unwrap_or(0.0) != 0.0).to_string(),
        Value::String(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => "true".to_string(),
            "false" | "no" | "0" | "off" | "" => "false".to_string(),
            _ => v.clone(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn normalize_tri_state(value: &Value) -> String {
    match value {
        Value::Bool(true) => "required".to_string(),
        Value::Bool(false) | Value::Null => "not used".to_string(),
        Value::String(v) => match v.trim().to_ascii_lowercase().as_str() {
            "required" | "true" => "required".to_string(),
            "optional" => "optional".to_string(),
            "not used" | "not_used" | "notused" | "not-used" | "false" | "" => {
                "not used".to_string()
            }
            _ => v.clone(),
        },
        other => value_as_text(other),
    }
}

fn normalize_value(kind: ParameterKind, value: &Value) -> String {
    match kind {
        ParameterKind::Text | ParameterKind::Combined { .. } => value_as_text(value),
        ParameterKind::Flag => normalize_flag(value),
        ParameterKind::TriState => normalize_tri_state(value),
    }
}

/// Ranks how closely `input_key` spells one of `names` (lower is closer):
/// exact match of the first name, then a case/separator variant of it, then
/// each further name in table order.
fn spelling_rank(input_key: &str, names: &[&str]) -> Option<usize> {
    let folded = fold_key(input_key);
    names.iter().enumerate().find_map(|(idx, name)| {
        if input_key == *name {
            Some(idx * 2)
        } else if folded == fold_key(name) {
            Some(idx * 2 + 1)
        } else {
            None
        }
    })
}

/// Picks the closest spelling of `names` present in `raw`, marking every
/// matching spelling as consumed.
fn take_best<'a>(
    raw: &'a BTreeMap<String, Value>,
    names: &[&str],
    consumed: &mut BTreeSet<&'a str>,
) -> Option<(&'a str, &'a Value)> {
    let mut best: Option<(usize, &'a str, &'a Value)> = None;
    for (key, value) in raw {
        if let Some(rank) = spelling_rank(key, names) {
            consumed.insert(key.as_str());
            if best.map(|(r, _, _)| rank < r).unwrap_or(true) {
                best = Some((rank, key.as_str(), value));
            }
        }
    }
    best.map(|(_, key, value)| (key, value))
}

fn spec_names(spec: &ParameterSpec) -> Vec<&'static str> {
    let mut names = Vec::with_capacity(spec.aliases.len() + 1);
    names.push(spec.key);
    names.extend_from_slice(spec.aliases);
    names
}

/// Resolves alias spellings, combined/split keys and value variants into
/// one canonical key-value map. Never fails: unrecognized keys pass through.
pub fn normalize_parameters(raw: &BTreeMap<String, Value>) -> NormalizedParameters {
    let mut consumed: BTreeSet<&str> = BTreeSet::new();
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();

    for spec in PARAMETER_TABLE {
        let names = spec_names(spec);
        match spec.kind {
            ParameterKind::Combined { parts } => {
                let combined = take_best(raw, &names, &mut consumed);
                let part_values = parts
                    .iter()
                    .map(|part| take_best(raw, &[*part], &mut consumed).map(|(_, v)| v))
                    .collect::<Vec<_>>();

                if let Some((key, value)) = combined {
                    if part_values.iter().any(Option::is_some) {
                        debug!(
                            "Parameter '{}' supplied with split parts; combined value from '{}' wins",
                            spec.key, key
                        );
                    }
                    normalized.insert(spec.key.to_string(), value_as_text(value));
                } else if part_values.iter().any(Option::is_some) {
                    let joined = part_values
                        .iter()
                        .map(|v| v.map(value_as_text).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join(COMBINED_PARAMETER_DELIMITER);
                    normalized.insert(spec.key.to_string(), joined);
                }
            }
            kind => {
                if let Some((key, value)) = take_best(raw, &names, &mut consumed) {
                    if key != spec.key {
                        debug!("Parameter alias '{}' resolved to '{}'", key, spec.key);
                    }
                    normalized.insert(spec.key.to_string(), normalize_value(kind, value));
                }
            }
        }
    }

    for (key, value) in raw {
        if consumed.contains(key.as_str()) || normalized.contains_key(key) {
            continue;
        }
        normalized.insert(key.clone(), value_as_text(value));
    }

    NormalizedParameters::from_map(normalized)
}
