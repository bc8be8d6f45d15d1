use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::{EmotionCnn, TrainedModel};
use crate::config::default_home_dir;
use crate::dataset::LabelEncoding;
use crate::emotion::Emotion;

/// Companion file holding the ordered label list.
pub const LABELS_FILE: &str = "label_classes.json";
/// Serialized network weights and architecture.
pub const MODEL_FILE: &str = "model.json";
/// Externally exported network, served through the `onnx` feature.
pub const ONNX_FILE: &str = "model.onnx";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("No model artifacts found at {0}")]
    Missing(PathBuf),
    /// Weights and label list do not belong together, or one is absent
    #[error("Artifact mismatch: {0}")]
    Mismatch(String),
    #[error("Label list hash mismatch: model expects {expected}, found {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("Unsupported artifact format version {0}")]
    VersionUnsupported(u32),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    format_version: u32,
    /// SHA-256 of the label list the weights were trained against
    labels_sha256: String,
    network: EmotionCnn,
}

/// Saves and loads trained models as `<models_dir>/<name>/{model.json,label_classes.json}`.
/// The two files are always written and read together.
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    /// Creates a new ModelStore with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        default_home_dir().join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(name).join(MODEL_FILE)
    }

    pub fn get_labels_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(name).join(LABELS_FILE)
    }

    pub fn get_onnx_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(name).join(ONNX_FILE)
    }

    pub fn is_model_saved(&self, name: &str) -> bool {
        let model_path = self.get_model_path(name);
        let labels_path = self.get_labels_path(name);
        log::info!("Checking if model is saved:");
        log::info!("  Model path: {:?} (exists: {})", model_path, model_path.exists());
        log::info!("  Labels path: {:?} (exists: {})", labels_path, labels_path.exists());
        model_path.exists() && labels_path.exists()
    }

    /// Names of every directory holding a complete artifact pair.
    pub fn list(&self) -> Result<Vec<String>, ArtifactError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.get_model_path(&name).exists() && self.get_labels_path(&name).exists() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn save(&self, name: &str, model: &TrainedModel) -> Result<(), ArtifactError> {
        let model_dir = self.models_dir.join(name);
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        let labels_path = self.get_labels_path(name);
        let labels_json = serde_json::to_string_pretty(model.encoding())
            .map_err(|e| ArtifactError::Serialization(e.to_string()))?;
        log::info!("Writing label list to {:?}", labels_path);
        fs::write(&labels_path, labels_json)?;

        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            labels_sha256: labels_hash(model.labels()),
            network: model.network().clone(),
        };
        let model_path = self.get_model_path(name);
        let model_json =
            serde_json::to_vec(&artifact).map_err(|e| ArtifactError::Serialization(e.to_string()))?;
        log::info!("Writing {} bytes to {:?}", model_json.len(), model_path);
        if let Err(e) = fs::write(&model_path, model_json) {
            log::error!("Failed to write model file: {}", e);
            // Never leave a label list behind without its weights
            let _ = fs::remove_file(&labels_path);
            return Err(e.into());
        }

        log::info!("Model '{}' saved", name);
        Ok(())
    }

    /// Loads the label list alone, e.g. to pair it with an exported network.
    pub fn load_labels(&self, name: &str) -> Result<LabelEncoding, ArtifactError> {
        let labels_path = self.get_labels_path(name);
        let content = fs::read_to_string(&labels_path)?;
        let classes: Vec<Emotion> =
            serde_json::from_str(&content).map_err(|e| ArtifactError::Serialization(e.to_string()))?;
        LabelEncoding::from_classes(classes).map_err(|e| ArtifactError::Serialization(e.to_string()))
    }

    /// Loads a model and its label list. Either file without the other, a
    /// label list other than the one the weights were trained with, or weights
    /// that disagree with their architecture are all `Mismatch` errors.
    pub fn load(&self, name: &str) -> Result<TrainedModel, ArtifactError> {
        let model_path = self.get_model_path(name);
        let labels_path = self.get_labels_path(name);
        log::info!("Loading model files:");
        log::info!("  Model path: {:?}", model_path);
        log::info!("  Labels path: {:?}", labels_path);

        match (model_path.exists(), labels_path.exists()) {
            (true, true) => {}
            (false, false) => return Err(ArtifactError::Missing(self.models_dir.join(name))),
            (true, false) => {
                return Err(ArtifactError::Mismatch(format!(
                    "weights at {:?} have no label list",
                    model_path
                )))
            }
            (false, true) => {
                return Err(ArtifactError::Mismatch(format!(
                    "label list at {:?} has no weights",
                    labels_path
                )))
            }
        }

        let encoding = self.load_labels(name)?;
        let bytes = fs::read(&model_path)?;
        log::info!("Read {} bytes", bytes.len());
        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Serialization(e.to_string()))?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(ArtifactError::VersionUnsupported(artifact.format_version));
        }

        let actual = labels_hash(encoding.classes());
        log::info!("Calculated label hash: {}", actual);
        log::info!("Expected label hash:   {}", artifact.labels_sha256);
        if actual != artifact.labels_sha256 {
            return Err(ArtifactError::HashMismatch {
                expected: artifact.labels_sha256,
                actual,
            });
        }

        artifact
            .network
            .check_consistency()
            .map_err(|e| ArtifactError::Mismatch(e.to_string()))?;
        TrainedModel::new(artifact.network, encoding).map_err(|e| ArtifactError::Mismatch(e.to_string()))
    }

    /// Like [`ModelStore::load`], but `Ok(None)` when neither file exists.
    /// A lone file or a hash mismatch is still an error.
    pub fn load_if_present(&self, name: &str) -> Result<Option<TrainedModel>, ArtifactError> {
        match self.load(name) {
            Ok(model) => Ok(Some(model)),
            Err(ArtifactError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, name: &str) -> Result<(), ArtifactError> {
        let model_path = self.get_model_path(name);
        let labels_path = self.get_labels_path(name);

        if model_path.exists() {
            log::info!("Removing model file: {:?}", model_path);
            fs::remove_file(&model_path)?;
        }
        if labels_path.exists() {
            log::info!("Removing labels file: {:?}", labels_path);
            fs::remove_file(&labels_path)?;
        }

        let model_dir = self.models_dir.join(name);
        if model_dir.exists() && fs::read_dir(&model_dir)?.next().is_none() {
            fs::remove_dir(&model_dir)?;
        }
        Ok(())
    }
}

fn labels_hash(classes: &[Emotion]) -> String {
    let canonical = classes
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
