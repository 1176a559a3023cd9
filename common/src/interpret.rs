//! Result Interpreter: score vector + label set -> ranked prediction.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::ScoreVector;
use crate::resources::ClassLabelSet;

/// Number of ranked classes reported when no other value is configured.
pub const DEFAULT_TOP_K: usize = 3;

/// One entry of the top-k ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLabel {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

/// Outcome of interpreting one forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub top_label: String,
    pub confidence: f32,
    pub top_k: Vec<RankedLabel>,
    pub raw_index: usize,
}

/// Rank scores into a [`PredictionResult`].
///
/// Labels are only used when they name every class; a short or empty label
/// set degrades every label to its stringified index.
pub fn interpret(scores: &ScoreVector, labels: &ClassLabelSet, k: usize) -> Result<PredictionResult> {
    let scores = scores.as_slice();
    let use_labels = !labels.is_empty() && labels.covers(scores.len());
    let label_for = |index: usize| -> String {
        match labels.get(index) {
            Some(label) if use_labels => label.to_string(),
            _ => index.to_string(),
        }
    };

    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(by_rank);

    let &(raw_index, confidence) = ranked.first().ok_or(PipelineError::EmptyScores)?;

    let top_k = ranked
        .iter()
        .take(k)
        .map(|&(index, score)| RankedLabel {
            index,
            label: label_for(index),
            score,
        })
        .collect();

    Ok(PredictionResult {
        top_label: label_for(raw_index),
        confidence,
        top_k,
        raw_index,
    })
}

/// Descending score, NaN last, ties broken by the lower index.
fn by_rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => a.0.cmp(&b.0),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b
            .1
            .partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0)),
    }
}
