use super::DisplayState;
use crate::models::verdict::{ BatchVerdict, ClassificationVerdict, SegmentStats };
use std::fmt::Write;

pub fn render(state: &DisplayState) -> String {
    match state {
        DisplayState::Idle => "No ECG file analysed yet.".to_string(),
        DisplayState::Loading { filename } => format!("Analysing {}...", filename),
        DisplayState::Success(verdict) => render_success(verdict),
        DisplayState::ProcessingError { filename, message } =>
            format!(
                "Could not process {}: {}\nCheck that the file contains a continuous single-lead ECG signal.",
                filename.as_deref().unwrap_or("the file"),
                message
            ),
        DisplayState::RequestFailed { filename, message } =>
            match filename {
                Some(name) => format!("Analysis request for {} failed: {}", name, message),
                None => format!("Analysis request failed: {}", message),
            },
    }
}

pub fn render_verdict(verdict: &ClassificationVerdict) -> String {
    render(&DisplayState::from_verdict(verdict))
}

fn render_success(verdict: &ClassificationVerdict) -> String {
    let mut out = String::new();
    if let Some(name) = &verdict.source_filename {
        let _ = writeln!(out, "File:              {}", name);
    }
    let _ = writeln!(out, "Diagnosis:         {}", verdict.predicted_diagnosis);
    let _ = writeln!(out, "Confidence:        {:.2}%", verdict.overall_confidence * 100.0);
    let _ = writeln!(out, "Heartbeats:        {}", verdict.total_heartbeats);
    let _ = writeln!(out, "Samples:           {}", verdict.continuous_samples);
    let _ = writeln!(
        out,
        "Majority vote:     {} of {} beats",
        verdict.majority_vote_count,
        verdict.total_heartbeats
    );

    if !verdict.segment_distribution.is_empty() {
        let _ = writeln!(out, "Segment distribution:");
        for (label, stats) in sorted_distribution(verdict) {
            let _ = writeln!(
                out,
                "  {:<36} {:>6} beats  {:>6.2}%  avg conf {:.2}%",
                label,
                stats.segment_count,
                stats.percentage,
                stats.avg_confidence * 100.0
            );
        }
    }
    out.trim_end().to_string()
}

pub fn sorted_distribution(verdict: &ClassificationVerdict) -> Vec<(&String, &SegmentStats)> {
    let mut entries: Vec<_> = verdict.segment_distribution.iter().collect();
    entries.sort_by(|a, b| b.1.percentage.total_cmp(&a.1.percentage).then_with(|| a.0.cmp(b.0)));
    entries
}

pub fn render_batch(batch: &BatchVerdict) -> String {
    let mut out = String::new();
    for verdict in &batch.results {
        let _ = writeln!(out, "{}\n", render_verdict(verdict));
    }
    let _ = write!(
        out,
        "{} of {} files classified successfully",
        batch.successful_predictions,
        batch.total_files
    );
    out
}
