//! ONNX Runtime scorer for classifiers exported from other training stacks.
//!
//! The exported network must take one `(1, size, size, 3)` float input in
//! [0, 1] and return one probability per class, in the order of the
//! companion label list.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use ndarray::Array4;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

use crate::calibration::ScoreVector;
use crate::classifier::ClassifierError;
use crate::dataset::LabelEncoding;
use crate::emotion::Emotion;
use crate::error::Result;
use crate::features::SpectrogramImage;
use crate::model_store::{ArtifactError, ModelStore};
use crate::scoring::{RawScores, ScoreSource};

static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

#[derive(Debug)]
pub struct RuntimeConfig {
    pub inter_threads: usize,
    pub intra_threads: usize,
    pub optimization_level: GraphOptimizationLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_threads: 0, // Let ONNX Runtime decide
            intra_threads: 0, // Let ONNX Runtime decide
            optimization_level: GraphOptimizationLevel::Level3,
        }
    }
}

impl Clone for RuntimeConfig {
    fn clone(&self) -> Self {
        Self {
            inter_threads: self.inter_threads,
            intra_threads: self.intra_threads,
            optimization_level: copy_level(&self.optimization_level),
        }
    }
}

fn copy_level(level: &GraphOptimizationLevel) -> GraphOptimizationLevel {
    match level {
        GraphOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
        GraphOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
        GraphOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        GraphOptimizationLevel::Disable => GraphOptimizationLevel::Disable,
    }
}

pub fn ensure_initialized() -> std::result::Result<(), ClassifierError> {
    INIT.get_or_init(|| {
        ort::init()
            .with_name("hearmony")
            .commit()
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(ClassifierError::BuildError)
}

pub fn create_session_builder(config: &RuntimeConfig) -> std::result::Result<SessionBuilder, ClassifierError> {
    ensure_initialized()?;
    let mut builder = Session::builder()?;

    // Configure threading
    if config.inter_threads > 0 {
        builder = builder.with_inter_threads(config.inter_threads)?;
    }
    if config.intra_threads > 0 {
        builder = builder.with_intra_threads(config.intra_threads)?;
    }

    builder = builder.with_optimization_level(copy_level(&config.optimization_level))?;
    Ok(builder)
}

/// Exported classifier plus the label list it was trained with.
#[derive(Debug)]
pub struct OnnxScorer {
    session: Arc<Session>,
    input_name: String,
    encoding: LabelEncoding,
    image_size: usize,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<OnnxScorer>();
    }
};

impl OnnxScorer {
    pub fn from_file(
        model_path: &Path,
        encoding: LabelEncoding,
        image_size: usize,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let session = create_session_builder(config)?
            .commit_from_file(model_path)
            .map_err(ClassifierError::from)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| ClassifierError::BuildError("Model declares no inputs".into()))?;
        log::info!("Loaded ONNX classifier from {:?} (input '{}')", model_path, input_name);

        Ok(Self {
            session: Arc::new(session),
            input_name,
            encoding,
            image_size,
        })
    }

    /// Loads `<name>/model.onnx` and its label list from a store. The
    /// network is unusable without the labels, and the reverse.
    pub fn from_store(store: &ModelStore, name: &str, image_size: usize, config: &RuntimeConfig) -> Result<Self> {
        let onnx_path = store.get_onnx_path(name);
        let labels_path = store.get_labels_path(name);
        match (onnx_path.exists(), labels_path.exists()) {
            (true, true) => {}
            (false, false) => return Err(ArtifactError::Missing(store.models_dir().join(name)).into()),
            _ => {
                return Err(ArtifactError::Mismatch(format!(
                    "{:?} and {:?} must be present together",
                    onnx_path, labels_path
                ))
                .into())
            }
        }
        let encoding = store.load_labels(name)?;
        Self::from_file(&onnx_path, encoding, image_size, config)
    }

    fn run(&self, image: &SpectrogramImage) -> Result<Vec<f32>> {
        let rgb = image.to_rgb();
        if rgb.size() != self.image_size {
            return Err(ClassifierError::ShapeError(format!(
                "Model expects {}px images, got {}px",
                self.image_size,
                rgb.size()
            ))
            .into());
        }
        let pixels = rgb.pixels();
        let input = Array4::from_shape_fn((1, self.image_size, self.image_size, 3), |(_, y, x, c)| {
            pixels[[c, y, x]]
        });

        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.clone(),
            Tensor::from_array(input)
                .map_err(|e| ClassifierError::PredictionError(format!("Failed to create input tensor: {}", e)))?,
        );
        let outputs = self
            .session
            .run(input_tensors)
            .map_err(|e| ClassifierError::PredictionError(format!("Failed to run model: {}", e)))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::PredictionError(format!("Failed to extract output tensor: {}", e)))?;
        Ok(output.iter().copied().collect())
    }
}

impl ScoreSource for OnnxScorer {
    fn name(&self) -> &str {
        "onnx"
    }

    fn labels(&self) -> &[Emotion] {
        self.encoding.classes()
    }

    fn score(&self, image: &SpectrogramImage) -> Result<RawScores> {
        let probabilities = self.run(image)?;
        if probabilities.len() != self.encoding.len() {
            return Err(ArtifactError::Mismatch(format!(
                "Model produced {} scores for {} labels",
                probabilities.len(),
                self.encoding.len()
            ))
            .into());
        }
        let scores = ScoreVector::from_probabilities(self.encoding.classes(), &probabilities)?;
        let winner = scores.argmax();
        Ok(RawScores { scores, winner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_initialization() {
        assert!(ensure_initialized().is_ok());
        assert!(ensure_initialized().is_ok()); // Second call should be fine
    }

    #[test]
    fn test_session_builder_config() {
        let config = RuntimeConfig {
            inter_threads: 2,
            intra_threads: 2,
            optimization_level: GraphOptimizationLevel::Level1,
        };
        assert!(create_session_builder(&config).is_ok());
    }

    #[test]
    fn test_store_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("exported")).unwrap();
        std::fs::write(store.get_onnx_path("exported"), b"not a model").unwrap();

        let result = OnnxScorer::from_store(&store, "exported", 128, &RuntimeConfig::default());
        assert!(matches!(
            result,
            Err(crate::HearmonyError::Artifact(ArtifactError::Mismatch(_)))
        ));
    }
}
