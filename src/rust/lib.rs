//! Speech emotion recognition: audio features, corpus normalization, a
//! convolutional classifier over mel spectrograms, and confidence calibration.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use hearmony::{Analysis, Analyzer};
//!
//! // Without a trained model the analyzer falls back to the placeholder scorer
//! let analyzer = Analyzer::with_placeholder()?;
//! match analyzer.analyze_file("recording.wav".as_ref()) {
//!     Analysis::Ready { prediction, insight } => {
//!         println!("{} {}", insight.emoji, prediction.emotion.title());
//!         for ranked in &prediction.top {
//!             println!("  {}", ranked);
//!         }
//!     }
//!     Analysis::Unavailable { reason } => println!("analysis unavailable: {}", reason),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Calibration
//!
//! ```rust
//! use hearmony::{calibrate, Emotion, ScoreVector};
//!
//! let raw = ScoreVector::new(vec![
//!     (Emotion::Happy, 0.50),
//!     (Emotion::Sad, 0.20),
//!     (Emotion::Angry, 0.15),
//!     (Emotion::Calm, 0.10),
//!     (Emotion::Fearful, 0.05),
//! ]).unwrap();
//!
//! let result = calibrate(&raw, Emotion::Sad).unwrap();
//! assert_eq!(result.emotion, Emotion::Sad);
//! assert_eq!(result.top[1].emotion, Emotion::Happy);
//! ```

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod emotion;
pub mod error;
pub mod features;
pub mod insights;
pub mod model_store;
#[cfg(feature = "onnx")]
pub mod runtime;
pub mod scoring;

pub use calibration::{calibrate, Calibrator, PredictionResult, RankedEmotion, ScoreVector};
pub use classifier::{
    ArchitectureDescriptor, ClassificationReport, ClassifierError, EpochRecord, TrainedModel, TrainerBuilder,
    TrainingOutcome,
};
pub use config::{CalibrationConfig, ExtractionConfig, PipelineConfig, TrainingConfig};
pub use corpus::{normalize, CorpusNormalizer, LabeledPath, NamingConvention};
pub use dataset::{Dataset, DatasetAssembler, LabelEncoding, LabeledExample, Split};
pub use emotion::Emotion;
pub use error::{HearmonyError, Result};
pub use features::{
    extract_melspectrogram, extract_mfcc, FeatureVector, MfccExtractor, SpectrogramExtractor, SpectrogramImage,
    Waveform,
};
pub use insights::{insight_for, Insight};
pub use model_store::{ArtifactError, ModelStore};
#[cfg(feature = "onnx")]
pub use runtime::{create_session_builder, OnnxScorer, RuntimeConfig};
pub use scoring::{Analysis, Analyzer, PlaceholderScorer, RawScores, ScoreSource};

pub fn init_logger() {
    env_logger::init();
}
