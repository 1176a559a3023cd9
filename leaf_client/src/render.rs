//! Plain-text rendering of diagnoses and history pages.

use common::{DiseaseInfo, ErrorResponse, PredictResponse, PredictionRecord, PredictionResult};
use std::fmt::Write;

const BAR_WIDTH: usize = 30;

fn bar(score: f32) -> String {
    let filled = (score.clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

/// Full local diagnosis. `info` is `None` when class labels are unavailable.
pub fn diagnosis(result: &PredictionResult, info: Option<&DiseaseInfo>) -> String {
    let mut out = String::new();

    let Some(info) = info else {
        let _ = writeln!(out, "Class Index: {} (Labels missing)", result.raw_index);
        let _ = writeln!(out, "Confidence Score: {:.2}%", result.confidence * 100.0);
        return out;
    };

    let _ = writeln!(out, "\nDiagnosis: {}", info.name);
    let _ = writeln!(out, "Confidence Score: {:.2}%", result.confidence * 100.0);
    let _ = writeln!(out, "Description: {}", info.description);

    if !info.prevention.is_empty() {
        let _ = writeln!(out, "\nPrevention Measures");
        for measure in &info.prevention {
            let _ = writeln!(out, "  - {}", measure);
        }
    }

    let _ = writeln!(out, "\nTop {} Predictions", result.top_k.len());
    let width = result
        .top_k
        .iter()
        .map(|r| r.label.chars().count())
        .max()
        .unwrap_or(0);
    for ranked in &result.top_k {
        let _ = writeln!(
            out,
            "  {:<width$}  {}  {:>6.2}%",
            ranked.label,
            bar(ranked.score),
            ranked.score * 100.0,
            width = width
        );
    }

    out
}

pub fn remote_prediction(response: &PredictResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "File: {}",
        response.filename.as_deref().unwrap_or("<unnamed>")
    );
    let _ = writeln!(out, "Prediction: {}", response.prediction);
    let _ = writeln!(out, "Confidence: {:.2}%", response.confidence * 100.0);
    match response.id {
        Some(id) => {
            let _ = writeln!(out, "Saved as #{}", id);
        }
        None => {
            let _ = writeln!(out, "Not saved to history");
        }
    }
    out
}

/// The prediction a failed request still carries, if any.
pub fn failed_prediction(err: &ErrorResponse) -> String {
    err.result
        .as_ref()
        .map(remote_prediction)
        .unwrap_or_default()
}

pub fn history(records: &[PredictionRecord]) -> String {
    if records.is_empty() {
        return "No predictions recorded.\n".to_string();
    }

    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "#{:<5} {}  {:<30} {:>6.2}%  {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.prediction,
            record.confidence * 100.0,
            record.filename.as_deref().unwrap_or("-")
        );
    }
    out
}
