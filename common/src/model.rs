//! Model Invoker
//!
//! Owns the one classifier a process ever loads. The artifact is resolved
//! from an ordered candidate list, loaded at most once behind a load-once
//! cell, and then shared read-only by every request. A failed load is cached
//! as well, so the invoker stays unready until the process restarts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedTensor;

/// Raw per-class scores from one forward pass.
///
/// Whether these sum to one depends on the artifact's final activation; the
/// invoker reports them untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(pub Vec<f32>);

impl ScoreVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}

/// A loaded image classifier able to run a single forward pass.
pub trait Classifier: Send + Sync {
    fn forward(&self, input: &NormalizedTensor) -> Result<ScoreVector>;
}

/// Builds a [`Classifier`] from an artifact on disk.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>>;
}

/// First candidate that exists on disk, in configured order.
pub fn resolve_artifact(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

/// A classifier together with where and how fast it was loaded.
pub struct LoadedModel {
    path: PathBuf,
    load_time: Duration,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_time(&self) -> Duration {
        self.load_time
    }

    /// Run exactly one forward pass.
    pub fn infer(&self, input: &NormalizedTensor) -> Result<ScoreVector> {
        let scores = self.classifier.forward(input)?;
        if scores.is_empty() {
            return Err(PipelineError::EmptyScores);
        }
        Ok(scores)
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("path", &self.path)
            .field("load_time", &self.load_time)
            .finish_non_exhaustive()
    }
}

/// Lazily loads the model once and hands out the shared handle.
pub struct ModelInvoker {
    candidates: Vec<PathBuf>,
    loader: Box<dyn ModelLoader>,
    slot: OnceLock<Result<Arc<LoadedModel>>>,
}

impl ModelInvoker {
    pub fn new(candidates: Vec<PathBuf>, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            candidates,
            loader,
            slot: OnceLock::new(),
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Resolve and load the artifact on the first call; every later call,
    /// concurrent or not, observes the same outcome without reloading.
    pub fn load_once(&self) -> Result<Arc<LoadedModel>> {
        self.slot.get_or_init(|| self.load_uncached()).clone()
    }

    fn load_uncached(&self) -> Result<Arc<LoadedModel>> {
        let Some(path) = resolve_artifact(&self.candidates) else {
            let err = PipelineError::ModelNotFound {
                candidates: self.candidates.clone(),
            };
            error!("{}", err);
            return Err(err);
        };

        info!("Loading model from {}", path.display());
        let start = Instant::now();
        let classifier = self.loader.load(&path).map_err(|e| {
            error!("Model load failed: {}", e);
            e
        })?;
        let load_time = start.elapsed();
        info!("✓ Model loaded in {:.2}ms", load_time.as_secs_f64() * 1000.0);

        Ok(Arc::new(LoadedModel {
            path,
            load_time,
            classifier,
        }))
    }

    /// The loaded model, if a load has already succeeded.
    pub fn loaded(&self) -> Option<&Arc<LoadedModel>> {
        self.slot.get().and_then(|outcome| outcome.as_ref().ok())
    }

    pub fn is_ready(&self) -> bool {
        self.loaded().is_some()
    }

    /// Forward pass through the loaded model.
    ///
    /// Does not trigger a load: before a successful [`load_once`](Self::load_once)
    /// this always fails with [`PipelineError::ModelNotLoaded`].
    pub fn infer(&self, input: &NormalizedTensor) -> Result<ScoreVector> {
        let model = self.loaded().ok_or(PipelineError::ModelNotLoaded)?;
        model.infer(input)
    }
}

/// Loads ONNX artifacts through ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    pub intra_threads: usize,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            intra_threads: cpu_count,
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>> {
        let session = Session::builder()
            .map_err(load_error(path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error(path))?
            .with_intra_threads(self.intra_threads.max(1))
            .map_err(load_error(path))?
            .commit_from_file(path)
            .map_err(load_error(path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PipelineError::ModelLoad {
                path: path.to_path_buf(),
                reason: "model declares no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PipelineError::ModelLoad {
                path: path.to_path_buf(),
                reason: "model declares no outputs".to_string(),
            })?;

        debug!("ONNX session ready: input '{}' -> output '{}'", input_name, output_name);

        Ok(Box::new(OnnxClassifier {
            session: Mutex::new(session),
            input_name,
            output_name,
        }))
    }
}

fn load_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> PipelineError + '_ {
    move |e| PipelineError::ModelLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// ONNX Runtime session wrapped for shared use.
///
/// `Session::run` needs exclusive access, so calls are serialised by the mutex.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl Classifier for OnnxClassifier {
    fn forward(&self, input: &NormalizedTensor) -> Result<ScoreVector> {
        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| PipelineError::Inference(format!("tensor conversion: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PipelineError::Inference("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                PipelineError::Inference(format!(
                    "output '{}' is not an f32 tensor: {}",
                    self.output_name, e
                ))
            })?;

        // (1, classes) or (classes,): the last axis holds the scores of the single image
        let classes = shape.as_ref().last().copied().unwrap_or(0).max(0) as usize;
        if classes == 0 || data.len() < classes {
            return Err(PipelineError::EmptyScores);
        }

        Ok(ScoreVector(data[..classes].to_vec()))
    }
}
