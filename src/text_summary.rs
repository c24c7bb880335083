//! Text summary builder for CLI output.
//!
//! Formats a [`RunSummary`] into human-readable lines for text mode.

use crate::model::{Decision, LayerReport, OutcomeKind, RunSummary};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn outcome_label(wanted: bool, kind: OutcomeKind) -> &'static str {
    if !wanted {
        return "-";
    }
    match kind {
        OutcomeKind::Pending => "pending",
        OutcomeKind::Ok => "ok",
        OutcomeKind::Canceled => "canceled",
        OutcomeKind::Failed => "FAILED",
    }
}

fn layer_line(report: &LayerReport, width: usize) -> String {
    let mut line = format!(
        "  {:<width$}  upload: {:<8}  save: {:<8}",
        report.name,
        outcome_label(report.wants_upload, report.upload),
        outcome_label(report.wants_save, report.save),
    );
    for cause in [&report.upload_cause, &report.save_cause].into_iter().flatten() {
        line.push_str(&format!("  ({cause})"));
    }
    line.trim_end().to_string()
}

pub(crate) fn build_text_summary(summary: &RunSummary) -> TextSummary {
    let mut lines = Vec::new();

    if summary.layers.is_empty() {
        lines.push("No layers needed uploading or saving.".to_string());
    } else {
        let width = summary.layers.iter().map(|l| l.name.len()).max().unwrap_or(0);
        lines.push(format!("Layers ({}):", summary.layers.len()));
        lines.extend(summary.layers.iter().map(|l| layer_line(l, width)));
    }

    if summary.unresolved {
        lines.push(format!(
            "{} problem(s): {} canceled, {} failed",
            summary.problems(),
            summary.canceled,
            summary.failed
        ));
    }

    lines.push(match summary.decision {
        Decision::Proceed => "Decision: proceed".to_string(),
        Decision::Cancel => "Decision: cancel (cancel was requested)".to_string(),
        Decision::Review => "Decision: review (retry or abandon the remaining layers)".to_string(),
    });

    TextSummary { lines }
}
