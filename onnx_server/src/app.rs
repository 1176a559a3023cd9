use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use common::{
    AppConfig, ErrorResponse, HealthResponse, HistoryQuery, InfoResponse, Pipeline,
    PipelineError, PredictResponse, PredictionRecord, RootResponse, LatencyWindow,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use sysinfo::System;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::history::{HistoryStore, NewRecord};

/// Forward-pass latencies kept for `/info`.
const LATENCY_WINDOW: usize = 1024;

// Application state
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub history: Arc<HistoryStore>,
    pub config: AppConfig,
    pub total_requests: AtomicU64,
    pub latencies: LatencyWindow,
    pub system: tokio::sync::Mutex<System>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, history: HistoryStore, config: AppConfig) -> Self {
        Self {
            pipeline,
            history: Arc::new(history),
            config,
            total_requests: AtomicU64::new(0),
            latencies: LatencyWindow::new(LATENCY_WINDOW),
            system: tokio::sync::Mutex::new(System::new()),
        }
    }
}

// Error handling
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Pipeline(PipelineError),
    /// Prediction succeeded but the history append failed
    Persistence {
        detail: String,
        result: PredictResponse,
    },
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse { detail, result: None },
            ),
            AppError::Pipeline(err) => {
                let status = match &err {
                    PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
                    PipelineError::ModelNotLoaded
                    | PipelineError::ModelNotFound { .. }
                    | PipelineError::ModelLoad { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    PipelineError::Inference(_) | PipelineError::EmptyScores => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (
                    status,
                    ErrorResponse {
                        detail: err.to_string(),
                        result: None,
                    },
                )
            }
            AppError::Persistence { detail, result } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    detail,
                    result: Some(result),
                },
            ),
            AppError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse { detail, result: None },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Pipeline(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Inference task failed: {}", err))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/info", get(info_handler))
        .route("/predict", post(predict))
        .route("/history", get(history))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Plant Disease Detector API is running".to_string(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let model_loaded = state.pipeline.invoker().is_ready();
    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "degraded" }.to_string(),
        model_loaded,
    })
}

async fn info_handler(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let (memory_rss_mb, cpu_percent) = {
        let mut system = state.system.lock().await;
        system.refresh_processes();
        sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| system.process(pid))
            .map(|process| (process.memory() as f64 / 1024.0 / 1024.0, process.cpu_usage()))
            .unwrap_or((0.0, 0.0))
    };

    let loaded = state.pipeline.invoker().loaded();
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    Json(InfoResponse {
        framework: "onnx-rust".to_string(),
        model_path: loaded.map(|m| m.path().display().to_string()),
        model_load_time_ms: loaded.map(|m| m.load_time().as_secs_f64() * 1000.0),
        num_labels: state.pipeline.labels().len(),
        num_disease_entries: state.pipeline.catalog().len(),
        top_k: state.pipeline.top_k(),
        total_requests: state.total_requests.load(Ordering::Relaxed),
        inference_latency_ms: state.latencies.summary(),
        cpu_count,
        memory_rss_mb,
        cpu_percent,
    })
}

async fn predict(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, AppError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().map(str::to_owned);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
            upload = Some((filename, bytes));
            break;
        }
    }
    let (filename, bytes) =
        upload.ok_or_else(|| AppError::BadRequest("Missing multipart field 'file'".to_string()))?;

    let pipeline = Arc::clone(&state.pipeline);
    let prediction = tokio::task::spawn_blocking(move || pipeline.predict_bytes(&bytes))
        .await?
        .map_err(|e| {
            if e.is_client_error() {
                warn!("Rejected upload {:?}: {}", filename, e);
            } else {
                error!("Prediction failed for {:?}: {}", filename, e);
            }
            AppError::Pipeline(e)
        })?;
    state.latencies.record(prediction.inference_time_ms());

    let result = prediction.result;
    let mut response = PredictResponse {
        filename: filename.clone(),
        prediction: result.top_label.clone(),
        confidence: result.confidence,
        id: None,
    };

    let history = Arc::clone(&state.history);
    let record = NewRecord {
        filename,
        prediction: result.top_label,
        confidence: result.confidence,
    };
    match tokio::task::spawn_blocking(move || history.append(record)).await? {
        Ok(record) => {
            info!(
                "Prediction #{}: {} ({:.2}%)",
                record.id,
                record.prediction,
                record.confidence * 100.0
            );
            response.id = Some(record.id);
            Ok(Json(response))
        }
        Err(e) => {
            error!("Failed to persist prediction: {:#}", e);
            Err(AppError::Persistence {
                detail: format!("Prediction computed but not saved: {:#}", e),
                result: response,
            })
        }
    }
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PredictionRecord>>, AppError> {
    let skip = query.skip.unwrap_or(0);
    let limit = state.config.page_limit(query.limit);
    Ok(Json(state.history.query(skip, limit)?))
}
