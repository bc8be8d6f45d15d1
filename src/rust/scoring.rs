//! Score sources and the interactive analysis path.
//!
//! Anything that turns a spectrogram into a [`ScoreVector`] plus a
//! designated winner implements [`ScoreSource`]; the calibrator never knows
//! whether the scores came from a trained network or the placeholder.

use std::path::Path;
use std::sync::Mutex;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Dirichlet, Distribution};
use serde::Serialize;

use crate::calibration::{Calibrator, PredictionResult, ScoreVector};
use crate::classifier::TrainedModel;
use crate::config::{CalibrationConfig, ExtractionConfig};
use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};
use crate::features::{SpectrogramExtractor, SpectrogramImage, Waveform};
use crate::insights::{insight_for, Insight};
use crate::model_store::ModelStore;

/// Uncalibrated scores and the label chosen as the primary prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScores {
    pub scores: ScoreVector,
    pub winner: Emotion,
}

pub trait ScoreSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Labels of every score vector this source produces, in order.
    fn labels(&self) -> &[Emotion];

    fn score(&self, image: &SpectrogramImage) -> Result<RawScores>;
}

impl ScoreSource for TrainedModel {
    fn name(&self) -> &str {
        "trained-cnn"
    }

    fn labels(&self) -> &[Emotion] {
        TrainedModel::labels(self)
    }

    fn score(&self, image: &SpectrogramImage) -> Result<RawScores> {
        let scores = self.predict(image)?;
        let winner = scores.argmax();
        Ok(RawScores { scores, winner })
    }
}

/// Stand-in used when no trained model is available: a uniformly random
/// winner and scores drawn from a symmetric Dirichlet distribution.
#[derive(Debug)]
pub struct PlaceholderScorer {
    labels: Vec<Emotion>,
    concentration: f64,
    rng: Mutex<StdRng>,
}

impl Default for PlaceholderScorer {
    fn default() -> Self {
        Self {
            labels: Emotion::INTERACTIVE.to_vec(),
            concentration: 0.5,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl PlaceholderScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_labels(mut self, labels: Vec<Emotion>) -> Result<Self> {
        if labels.is_empty() {
            return Err(HearmonyError::Validation("Placeholder needs at least one label".into()));
        }
        self.labels = labels;
        Ok(self)
    }

    pub fn with_concentration(mut self, concentration: f64) -> Result<Self> {
        if !(concentration > 0.0 && concentration.is_finite()) {
            return Err(HearmonyError::Validation(format!(
                "Dirichlet concentration must be positive, got {}",
                concentration
            )));
        }
        self.concentration = concentration;
        Ok(self)
    }

    /// Draws one raw score vector without looking at any audio.
    pub fn sample(&self) -> Result<RawScores> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let winner = *self
            .labels
            .choose(&mut *rng)
            .ok_or_else(|| HearmonyError::Validation("Placeholder has no labels".into()))?;

        let probabilities = if self.labels.len() == 1 {
            vec![1.0]
        } else {
            let alpha = vec![self.concentration; self.labels.len()];
            let dirichlet = Dirichlet::new(&alpha)
                .map_err(|e| HearmonyError::Validation(format!("Invalid Dirichlet parameters: {}", e)))?;
            dirichlet.sample(&mut *rng)
        };

        let scores = ScoreVector::new(self.labels.iter().copied().zip(probabilities).collect())?;
        Ok(RawScores { scores, winner })
    }
}

impl ScoreSource for PlaceholderScorer {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn labels(&self) -> &[Emotion] {
        &self.labels
    }

    fn score(&self, _image: &SpectrogramImage) -> Result<RawScores> {
        self.sample()
    }
}

/// Outcome of one interactive request: a complete calibrated answer or a
/// reason why there is none. There is no partial result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Analysis {
    Ready {
        prediction: PredictionResult,
        insight: Insight,
    },
    Unavailable {
        reason: String,
    },
}

impl Analysis {
    pub fn is_ready(&self) -> bool {
        matches!(self, Analysis::Ready { .. })
    }

    pub fn prediction(&self) -> Option<&PredictionResult> {
        match self {
            Analysis::Ready { prediction, .. } => Some(prediction),
            Analysis::Unavailable { .. } => None,
        }
    }
}

/// Recording in, calibrated prediction out.
pub struct Analyzer {
    extractor: SpectrogramExtractor,
    source: Box<dyn ScoreSource>,
    calibrator: Calibrator,
}

impl Analyzer {
    pub fn new(
        source: Box<dyn ScoreSource>,
        extraction: ExtractionConfig,
        calibration: CalibrationConfig,
    ) -> Result<Self> {
        Ok(Self {
            extractor: SpectrogramExtractor::new(extraction)?,
            source,
            calibrator: Calibrator::new(calibration)?,
        })
    }

    /// Analyzer over a trained model, rendering images at the size and
    /// channel count the network was trained on.
    pub fn from_model(
        model: TrainedModel,
        extraction: ExtractionConfig,
        calibration: CalibrationConfig,
    ) -> Result<Self> {
        let arch = model.architecture();
        let extraction = ExtractionConfig {
            image_size: arch.input_size,
            color: arch.channels == 3,
            ..extraction
        };
        Self::new(Box::new(model), extraction, calibration)
    }

    /// Analyzer over the model saved as `name`, or over the placeholder when
    /// the store holds no files for that name. Half-saved or mismatched
    /// artifacts fail before any inference.
    pub fn from_store(
        store: &ModelStore,
        name: &str,
        extraction: ExtractionConfig,
        calibration: CalibrationConfig,
    ) -> Result<Self> {
        match store.load_if_present(name)? {
            Some(model) => Self::from_model(model, extraction, calibration),
            None => {
                warn!("No saved model '{}' in {:?}; using placeholder scores", name, store.models_dir());
                Self::new(Box::new(PlaceholderScorer::new()), extraction, calibration)
            }
        }
    }

    /// Analyzer with the placeholder scorer and default settings.
    pub fn with_placeholder() -> Result<Self> {
        Self::new(
            Box::new(PlaceholderScorer::new()),
            ExtractionConfig::spectrogram(),
            CalibrationConfig::default(),
        )
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Rendering settings used for every analyzed recording.
    pub fn extraction_config(&self) -> &ExtractionConfig {
        self.extractor.config()
    }

    pub fn analyze_file(&self, path: &Path) -> Analysis {
        info!("Analyzing {:?} with the {} scorer", path, self.source.name());
        self.finish(self.extractor.extract_file(path))
    }

    /// Applies the configured offset and duration, resamples, then analyzes.
    pub fn analyze_waveform(&self, waveform: &Waveform) -> Analysis {
        let config = self.extractor.config();
        let image = waveform
            .window(config.offset_secs, config.max_duration_secs)
            .resample(config.target_sample_rate)
            .and_then(|clip| self.extractor.extract(&clip));
        self.finish(image)
    }

    pub fn analyze_image(&self, image: &SpectrogramImage) -> Analysis {
        match self.predict(image) {
            Ok(prediction) => Analysis::Ready {
                insight: insight_for(prediction.emotion),
                prediction,
            },
            Err(e) => {
                warn!("Analysis unavailable: {}", e);
                Analysis::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn finish(&self, image: Result<SpectrogramImage>) -> Analysis {
        match image {
            Ok(image) => self.analyze_image(&image),
            Err(e) => {
                warn!("Analysis unavailable: {}", e);
                Analysis::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn predict(&self, image: &SpectrogramImage) -> Result<PredictionResult> {
        let raw = self.source.score(image)?;
        self.calibrator.calibrate(&raw.scores, raw.winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_scores_are_valid() {
        let scorer = PlaceholderScorer::new().with_seed(42);
        for _ in 0..50 {
            let raw = scorer.sample().unwrap();
            assert_eq!(raw.scores.len(), 7);
            assert!((raw.scores.sum() - 1.0).abs() < 1e-9);
            assert!(Emotion::INTERACTIVE.contains(&raw.winner));
        }
    }

    #[test]
    fn test_placeholder_is_reproducible_per_seed() {
        let a = PlaceholderScorer::new().with_seed(3);
        let b = PlaceholderScorer::new().with_seed(3);
        assert_eq!(a.sample().unwrap(), b.sample().unwrap());
    }

    #[test]
    fn test_single_label_placeholder() {
        let scorer = PlaceholderScorer::new()
            .with_labels(vec![Emotion::Calm])
            .unwrap()
            .with_seed(1);
        let raw = scorer.sample().unwrap();
        assert_eq!(raw.winner, Emotion::Calm);
        assert_eq!(raw.scores.entries(), &[(Emotion::Calm, 1.0)]);
        assert!(PlaceholderScorer::new().with_labels(vec![]).is_err());
        assert!(PlaceholderScorer::new().with_concentration(0.0).is_err());
    }

    #[test]
    fn test_score_source_is_object_safe() {
        let sources: Vec<Box<dyn ScoreSource>> = vec![Box::new(PlaceholderScorer::new().with_seed(9))];
        let image = SpectrogramImage::from_pixels(ndarray::Array3::zeros((3, 4, 4))).unwrap();
        let raw = sources[0].score(&image).unwrap();
        assert_eq!(sources[0].labels().len(), raw.scores.len());
    }
}
