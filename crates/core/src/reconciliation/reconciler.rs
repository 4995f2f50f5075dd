use super::reconciliation_model::{
    Classification, ExpectedForm, ReconciliationEntry, ReconciliationReport, SubjectFormState,
};

fn classify(form: &ExpectedForm) -> (Classification, Option<String>) {
    let snapshot = form.instance.as_ref().and_then(|i| i.snapshot.as_ref());
    let resolved = form.resolved_version.as_ref();

    match (snapshot, resolved) {
        (None, Some(_)) => (Classification::Missing, None),
        (None, None) => (
            Classification::Missing,
            Some("current template version cannot be resolved".to_string()),
        ),
        (Some(_), None) => (
            Classification::Stale,
            Some("snapshot exists but its template version cannot be resolved".to_string()),
        ),
        (Some(snapshot), Some(version)) => {
            if snapshot.version_id != version.version_id {
                (
                    Classification::Stale,
                    Some(format!(
                        "snapshot taken from version '{}', assignment now resolves to '{}'",
                        snapshot.version_id, version.version_id
                    )),
                )
            } else if snapshot.field_count != version.field_count {
                (
                    Classification::Stale,
                    Some(format!(
                        "snapshot has {} field(s), version now has {}",
                        snapshot.field_count, version.field_count
                    )),
                )
            } else {
                (Classification::Consistent, None)
            }
        }
    }
}

/// Classifies every (visit instance, applicable assignment) pair. Emits
/// exactly one entry per pair in the state.
pub fn classify_subject_forms(state: &SubjectFormState) -> ReconciliationReport {
    let entries = state
        .visits
        .iter()
        .flat_map(|visit| {
            visit.forms.iter().map(move |form| {
                let (classification, issue) = classify(form);
                ReconciliationEntry {
                    visit_instance_id: visit.visit_instance_id.clone(),
                    form_assignment_id: form.form_assignment_id.clone(),
                    classification,
                    form_instance_id: form
                        .instance
                        .as_ref()
                        .map(|i| i.form_instance_id.clone()),
                    issue,
                }
            })
        })
        .collect();

    ReconciliationReport {
        subject_id: state.subject_id.clone(),
        entries,
    }
}
