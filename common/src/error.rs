//! Error types for the diagnosis pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the image-to-prediction pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Image bytes were empty, truncated, or in an unsupported format
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// None of the configured model candidates exist on disk
    #[error("model artifact not found; checked: {}", display_paths(.candidates))]
    ModelNotFound { candidates: Vec<PathBuf> },

    /// The artifact exists but the runtime refused to load it
    #[error("failed to load model from {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// Inference was requested without a successfully loaded model
    #[error("model not loaded")]
    ModelNotLoaded,

    /// The forward pass itself failed
    #[error("inference failed: {0}")]
    Inference(String),

    /// The model produced no class scores
    #[error("model returned an empty score vector")]
    EmptyScores,
}

impl PipelineError {
    /// Whether the failure was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Decode(_))
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Decode(err.to_string())
    }
}

/// Label set does not cover every class of the model.
///
/// Never returned as an error: callers log it and degrade to raw indices.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("label set has {labels} entries but the model scores {classes} classes; reporting raw indices")]
pub struct LabelSetMismatch {
    pub labels: usize,
    pub classes: usize,
}

fn display_paths(paths: &[PathBuf]) -> String {
    struct Joined<'a>(&'a [PathBuf]);

    impl fmt::Display for Joined<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.0.is_empty() {
                return f.write_str("<no candidates configured>");
            }
            for (i, path) in self.0.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", path.display())?;
            }
            Ok(())
        }
    }

    Joined(paths).to_string()
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
