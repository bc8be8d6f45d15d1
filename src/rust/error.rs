use std::io;
use std::path::PathBuf;

use crate::classifier::ClassifierError;
use crate::model_store::ArtifactError;

/// Errors surfaced by the extraction, corpus, dataset and inference stages.
///
/// Per-file variants (`Decode`, `UnrecognizedLabel`) are recovered by the
/// batch stages: the offending example is logged and dropped. Structural
/// variants (`EmptyDataset`, `Artifact`) halt the operation that raised them.
#[derive(Debug, thiserror::Error)]
pub enum HearmonyError {
    /// Audio could not be decoded (corrupt file, unsupported container)
    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// A corpus entry carries a code that maps to no canonical emotion
    #[error("Unrecognized emotion code '{code}' for {}", path.display())]
    UnrecognizedLabel { path: PathBuf, code: String },

    /// No examples survived filtering
    #[error("No labeled examples available; training cannot proceed")]
    EmptyDataset,

    /// The corpus root handed to the normalizer does not exist
    #[error("Corpus root not found: {}", .0.display())]
    CorpusNotFound(PathBuf),

    /// Invalid input parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network construction, training or inference failed
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// Persisted artifacts are missing, mismatched or corrupt
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HearmonyError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only affect a single file and are skipped in batch runs.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::UnrecognizedLabel { .. })
    }
}

pub type Result<T, E = HearmonyError> = std::result::Result<T, E>;
