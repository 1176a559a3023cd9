//! Inference Pipeline
//!
//! Normalizer -> Invoker -> Interpreter, shared by both front ends. The
//! pipeline is an ordinary value: callers own it (usually behind an `Arc`)
//! and pass it to whatever needs a prediction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::interpret::{interpret, PredictionResult};
use crate::model::{LoadedModel, ModelInvoker, OnnxLoader};
use crate::normalize::{normalize_bytes, normalize_image, NormalizedTensor};
use crate::resources::{load_optional, ClassLabelSet, DiseaseCatalog, DiseaseInfo};

/// A prediction plus how long the forward pass took.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    #[serde(flatten)]
    pub result: PredictionResult,
    #[serde(skip)]
    pub inference_time: Duration,
}

impl Prediction {
    pub fn inference_time_ms(&self) -> f64 {
        self.inference_time.as_secs_f64() * 1000.0
    }
}

pub struct Pipeline {
    invoker: ModelInvoker,
    labels: ClassLabelSet,
    catalog: DiseaseCatalog,
    top_k: usize,
    mismatch_reported: AtomicBool,
}

impl Pipeline {
    pub fn new(
        invoker: ModelInvoker,
        labels: ClassLabelSet,
        catalog: DiseaseCatalog,
        top_k: usize,
    ) -> Self {
        Self {
            invoker,
            labels,
            catalog,
            top_k: top_k.max(1),
            mismatch_reported: AtomicBool::new(false),
        }
    }

    /// ONNX-backed pipeline with labels and disease metadata resolved from config.
    ///
    /// The model itself is not loaded until [`load_model`](Self::load_model).
    pub fn from_config(config: &AppConfig) -> Self {
        let mut loader = OnnxLoader::default();
        if config.model.intra_threads > 0 {
            loader.intra_threads = config.model.intra_threads;
        }
        let invoker = ModelInvoker::new(config.model.candidates.clone(), Box::new(loader));
        let labels: ClassLabelSet = load_optional(&config.labels.candidates, "class labels");
        let catalog: DiseaseCatalog = load_optional(&config.disease_info.candidates, "disease info");

        Self::new(invoker, labels, catalog, config.top_k)
    }

    pub fn load_model(&self) -> Result<Arc<LoadedModel>> {
        self.invoker.load_once()
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    pub fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }

    pub fn catalog(&self) -> &DiseaseCatalog {
        &self.catalog
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Disease metadata for a label; a placeholder when the catalog has none.
    pub fn describe(&self, label: &str) -> DiseaseInfo {
        self.catalog.describe(label)
    }

    /// Decode, normalize, classify and rank raw image bytes.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        self.ensure_ready()?;
        let tensor = normalize_bytes(bytes)?;
        self.run(&tensor)
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        self.ensure_ready()?;
        let tensor = normalize_image(image);
        self.run(&tensor)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.invoker.is_ready() {
            Ok(())
        } else {
            Err(PipelineError::ModelNotLoaded)
        }
    }

    fn run(&self, tensor: &NormalizedTensor) -> Result<Prediction> {
        let start = Instant::now();
        let scores = self.invoker.infer(tensor)?;
        let inference_time = start.elapsed();

        if let Some(mismatch) = self.labels.check(scores.len()) {
            if !self.mismatch_reported.swap(true, Ordering::Relaxed) {
                warn!("{}", mismatch);
            }
        }

        let result = interpret(&scores, &self.labels, self.top_k)?;
        debug!(
            "Predicted '{}' ({:.4}) in {:.2}ms",
            result.top_label,
            result.confidence,
            inference_time.as_secs_f64() * 1000.0
        );

        Ok(Prediction {
            result,
            inference_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::FixedLoader;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([30, 160, 40])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn pipeline_with(
        dir: &tempfile::TempDir,
        scores: Vec<f32>,
        labels: ClassLabelSet,
    ) -> (Pipeline, FixedLoaderCounters) {
        let path = dir.path().join("plant_model.onnx");
        std::fs::write(&path, b"stub").unwrap();
        let loader = FixedLoader::new(scores);
        let counters = FixedLoaderCounters {
            forwards: Arc::clone(&loader.forwards),
        };
        let invoker = ModelInvoker::new(vec![path], Box::new(loader));
        (Pipeline::new(invoker, labels, DiseaseCatalog::default(), 3), counters)
    }

    struct FixedLoaderCounters {
        forwards: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[test]
    fn test_end_to_end_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let labels = ClassLabelSet::from(vec!["healthy", "rust", "blight"]);
        let (pipeline, counters) = pipeline_with(&dir, vec![0.1, 0.7, 0.2], labels);
        pipeline.load_model().unwrap();

        let prediction = pipeline.predict_bytes(&png_bytes()).unwrap();

        assert_eq!(prediction.result.top_label, "rust");
        assert_eq!(prediction.result.confidence, 0.7);
        assert_eq!(prediction.result.top_k.len(), 3);
        assert_eq!(counters.forwards.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_corrupt_image_halts_before_model() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, counters) = pipeline_with(&dir, vec![0.5, 0.5], ClassLabelSet::default());
        pipeline.load_model().unwrap();

        let err = pipeline.predict_bytes(b"\x89PNG\r\n\x1a\ngarbage").unwrap_err();

        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(counters.forwards.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unloaded_model_rejects_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, counters) = pipeline_with(&dir, vec![1.0], ClassLabelSet::default());

        // Corrupt bytes still report the missing model: no work is attempted.
        assert_eq!(
            pipeline.predict_bytes(b"garbage").unwrap_err(),
            PipelineError::ModelNotLoaded
        );
        assert_eq!(counters.forwards.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_artifact_scenario() {
        let invoker = ModelInvoker::new(
            vec![PathBuf::from("/nonexistent/plant_model.onnx")],
            Box::new(FixedLoader::new(vec![1.0])),
        );
        let pipeline = Pipeline::new(invoker, ClassLabelSet::default(), DiseaseCatalog::default(), 3);

        assert!(matches!(
            pipeline.load_model().unwrap_err(),
            PipelineError::ModelNotFound { .. }
        ));
        assert_eq!(
            pipeline.predict_bytes(&png_bytes()).unwrap_err(),
            PipelineError::ModelNotLoaded
        );
    }

    #[test]
    fn test_mismatched_labels_degrade_to_indices() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline_with(&dir, vec![0.1, 0.2, 0.6, 0.1], ClassLabelSet::from(vec!["a", "b"]));
        pipeline.load_model().unwrap();

        let image = DynamicImage::new_rgb8(10, 10);
        let first = pipeline.predict_image(&image).unwrap();
        let second = pipeline.predict_image(&image).unwrap();

        assert_eq!(first.result.top_label, "2");
        assert_eq!(first.result, second.result);
    }

    #[test]
    fn test_describe_uses_placeholder_for_unknown_label() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline_with(&dir, vec![1.0], ClassLabelSet::default());
        let info = pipeline.describe("0");
        assert_eq!(info.name, "0");
        assert_eq!(info.description, "No description available.");
    }
}
