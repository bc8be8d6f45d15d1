//! Convolutional classifier over spectrogram images.

pub mod builder;
pub mod error;
pub mod layers;
pub mod metrics;
pub mod model;
pub mod network;
pub mod optimizer;

pub use builder::{EpochRecord, TrainerBuilder, TrainingOutcome};
pub use error::ClassifierError;
pub use metrics::{AverageMetrics, ClassMetrics, ClassificationReport};
pub use model::TrainedModel;
pub use network::{ArchitectureDescriptor, EmotionCnn};
pub use optimizer::Adam;
