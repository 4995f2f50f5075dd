//! Plain-text tables printed for operator verification.

use edc_core::reconciliation::{Classification, ReconciliationReport, RepairOutcome};
use edc_core::snapshots::{RebuildSummary, SubjectSnapshotCount};

pub fn print_counts(title: &str, counts: &[SubjectSnapshotCount]) {
    println!("{}", title);
    if counts.is_empty() {
        println!("  (no subjects)");
        return;
    }
    let width = counts
        .iter()
        .map(|c| c.label.len())
        .max()
        .unwrap_or(0)
        .max("Subject".len());
    println!(
        "  {:<width$}  {:>14}  {:>9}  {}",
        "Subject",
        "Form instances",
        "Snapshots",
        "",
        width = width
    );
    for count in counts {
        let marker = if count.form_instances == count.snapshots {
            ""
        } else {
            "MISMATCH"
        };
        println!(
            "  {:<width$}  {:>14}  {:>9}  {}",
            count.label,
            count.form_instances,
            count.snapshots,
            marker,
            width = width
        );
    }
}

pub fn print_rebuild(summary: &RebuildSummary) {
    println!(
        "Rebuilt {} snapshot(s); discarded {}; kept {}; {} failure(s)",
        summary.rebuilt,
        summary.discarded,
        summary.retained,
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!("  form instance {}: {}", failure.form_instance_id, failure.message);
    }
}

pub fn print_report(report: &ReconciliationReport) {
    println!(
        "Subject {}: {} consistent, {} missing, {} stale",
        report.subject_id,
        report.count(Classification::Consistent),
        report.count(Classification::Missing),
        report.count(Classification::Stale)
    );
    for entry in report
        .entries
        .iter()
        .filter(|e| e.classification != Classification::Consistent)
    {
        println!(
            "  {:?} visit={} assignment={} instance={}{}",
            entry.classification,
            entry.visit_instance_id,
            entry.form_assignment_id,
            entry.form_instance_id.as_deref().unwrap_or("-"),
            entry
                .issue
                .as_deref()
                .map(|issue| format!(" ({})", issue))
                .unwrap_or_default()
        );
    }
}

pub fn print_repair(subject_id: &str, outcome: &RepairOutcome) {
    println!(
        "Subject {}: repaired {} missing snapshot(s)",
        subject_id, outcome.repaired_count
    );
    for error in &outcome.errors {
        println!(
            "  failed visit={} assignment={}: {}",
            error.visit_instance_id, error.form_assignment_id, error.message
        );
    }
}
