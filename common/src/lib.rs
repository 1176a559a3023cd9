pub mod config;
pub mod error;
pub mod http;
pub mod interpret;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod resources;
pub mod stats;

pub use config::AppConfig;
pub use error::{LabelSetMismatch, PipelineError};
pub use http::{
    ErrorResponse, HealthResponse, HistoryQuery, InfoResponse, PredictResponse, PredictionRecord,
    RootResponse,
};
pub use interpret::{interpret, PredictionResult, RankedLabel};
pub use model::{Classifier, LoadedModel, ModelInvoker, ModelLoader, ScoreVector};
pub use normalize::NormalizedTensor;
pub use pipeline::{Pipeline, Prediction};
pub use resources::{ClassLabelSet, DiseaseCatalog, DiseaseInfo};
pub use stats::{LatencySummary, LatencyWindow};
