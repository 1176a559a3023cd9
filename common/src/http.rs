use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::LatencySummary;

/// Body of `POST /predict`.
///
/// `id` is `None` only when the prediction succeeded but could not be logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub filename: Option<String>,
    pub prediction: String,
    pub confidence: f32,
    pub id: Option<u64>,
}

/// One persisted prediction, as stored in the history log and served by `GET /history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub filename: Option<String>,
    pub prediction: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub framework: String,
    pub model_path: Option<String>,
    pub model_load_time_ms: Option<f64>,
    pub num_labels: usize,
    pub num_disease_entries: usize,
    pub top_k: usize,
    pub total_requests: u64,
    pub inference_latency_ms: LatencySummary,
    pub cpu_count: usize,
    pub memory_rss_mb: f64,
    pub cpu_percent: f32,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    /// Present when the prediction was computed but could not be persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictResponse>,
}
