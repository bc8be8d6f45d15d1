use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HearmonyError, Result};

/// Environment variable overriding the artifact home directory.
pub const HOME_ENV: &str = "HEARMONY_HOME";

/// Parameters for turning a recording into a fixed-size representation.
///
/// `offset_secs` and `max_duration_secs` are applied at load time in the
/// recording's native rate, before resampling to `target_sample_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub target_sample_rate: u32,
    pub offset_secs: f32,
    pub max_duration_secs: Option<f32>,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub image_size: usize,
    /// Dynamic range kept below the peak, in decibels
    pub top_db: f32,
    /// Render spectrogram images through the colormap (3 channels) instead of grayscale
    pub color: bool,
}

impl ExtractionConfig {
    /// Settings used for MFCC feature vectors: 44.1 kHz, 0.3 s lead-in skipped, 3 s kept.
    pub fn mfcc() -> Self {
        Self {
            target_sample_rate: 44_100,
            offset_secs: 0.3,
            max_duration_secs: Some(3.0),
            ..Self::spectrogram()
        }
    }

    /// Settings used for spectrogram images: 22.05 kHz, first 4 s, 128x128 pixels.
    pub fn spectrogram() -> Self {
        Self {
            target_sample_rate: 22_050,
            offset_secs: 0.0,
            max_duration_secs: Some(4.0),
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 40,
            image_size: 128,
            top_db: 80.0,
            color: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_sample_rate == 0 {
            return Err(HearmonyError::Validation("Target sample rate must be positive".into()));
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return Err(HearmonyError::Validation(format!(
                "Invalid STFT parameters: n_fft={}, hop_length={}",
                self.n_fft, self.hop_length
            )));
        }
        if self.n_mels == 0 || self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(HearmonyError::Validation(format!(
                "Invalid filterbank sizes: n_mels={}, n_mfcc={}",
                self.n_mels, self.n_mfcc
            )));
        }
        if self.image_size == 0 {
            return Err(HearmonyError::Validation("Image size must be positive".into()));
        }
        if self.offset_secs < 0.0 || self.max_duration_secs.is_some_and(|d| d <= 0.0) {
            return Err(HearmonyError::Validation("Offset and duration must be non-negative".into()));
        }
        if self.top_db <= 0.0 {
            return Err(HearmonyError::Validation("top_db must be positive".into()));
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        if self.color {
            3
        } else {
            1
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::spectrogram()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Epochs without held-out loss improvement before stopping
    pub patience: usize,
    pub learning_rate: f32,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            patience: 5,
            learning_rate: 1e-3,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(HearmonyError::Validation("Epochs and batch size must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(HearmonyError::Validation(format!(
                "Test fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(HearmonyError::Validation("Learning rate must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Floor applied to the designated winner's probability
    pub min_confidence: f64,
    pub top_k: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            top_k: 3,
        }
    }
}

/// Settings for a full pipeline run, loadable from TOML.
///
/// ```toml
/// artifacts_dir = "/var/lib/hearmony"
///
/// [training]
/// epochs = 30
///
/// [calibration]
/// min_confidence = 0.45
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub artifacts_dir: Option<PathBuf>,
    pub mfcc: ExtractionConfig,
    pub spectrogram: ExtractionConfig,
    pub training: TrainingConfig,
    pub calibration: CalibrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: None,
            mfcc: ExtractionConfig::mfcc(),
            spectrogram: ExtractionConfig::spectrogram(),
            training: TrainingConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| HearmonyError::Validation(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded pipeline configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.mfcc.validate()?;
        self.spectrogram.validate()?;
        self.training.validate()?;
        if !(0.0..1.0).contains(&self.calibration.min_confidence) {
            return Err(HearmonyError::Validation(format!(
                "Minimum confidence must be in [0, 1), got {}",
                self.calibration.min_confidence
            )));
        }
        Ok(())
    }

    /// Directory holding persisted models: explicit setting, then `HEARMONY_HOME`,
    /// then the platform data directory.
    pub fn resolve_artifacts_dir(&self) -> PathBuf {
        match &self.artifacts_dir {
            Some(dir) => dir.clone(),
            None => default_home_dir().join("models"),
        }
    }
}

pub(crate) fn default_home_dir() -> PathBuf {
    // 1. Environment override
    if let Ok(path) = env::var(HOME_ENV) {
        return PathBuf::from(path);
    }

    // 2. Platform-specific data directory
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("hearmony");
    }

    // 3. Fallback to the user's home directory
    if let Some(home_dir) = dirs::home_dir() {
        return home_dir.join(".hearmony");
    }

    env::temp_dir().join("hearmony")
}
