use std::f32::consts::PI;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::mel::{power_to_db, MelSpectrogram};
use super::waveform::Waveform;
use crate::config::ExtractionConfig;
use crate::error::{HearmonyError, Result};

/// Time-averaged MFCCs. Its length equals the configured coefficient count
/// regardless of the clip's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Array1<f32>,
}

impl FeatureVector {
    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.to_vec()
    }
}

/// Computes MFCC vectors for waveforms already at the configured rate.
pub struct MfccExtractor {
    config: ExtractionConfig,
    mel: MelSpectrogram,
    dct: Array2<f32>,
}

impl MfccExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let mel = MelSpectrogram::new(
            config.target_sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
        )?;
        let dct = dct_matrix(config.n_mfcc, config.n_mels);
        Ok(Self { config, mel, dct })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Loads `path` with this extractor's offset, duration and rate, then extracts.
    pub fn extract_file(&self, path: &Path) -> Result<FeatureVector> {
        let waveform = Waveform::load(path, &self.config)?;
        self.extract(&waveform)
    }

    /// Coefficients averaged across time frames.
    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureVector> {
        if waveform.sample_rate() != self.config.target_sample_rate {
            return Err(HearmonyError::Validation(format!(
                "Waveform at {} Hz, extractor expects {} Hz",
                waveform.sample_rate(),
                self.config.target_sample_rate
            )));
        }
        let coefficients = self.coefficients(waveform.samples())?;
        let values = coefficients
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.config.n_mfcc));
        Ok(FeatureVector { values })
    }

    /// Per-frame coefficients, shape `(n_mfcc, frames)`.
    pub fn coefficients(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let mel = self.mel.compute(samples)?;
        let db = power_to_db(&mel, 1.0, Some(self.config.top_db));
        Ok(self.dct.dot(&db))
    }
}

/// Orthonormal DCT-II basis, shape `(n_out, n_in)`.
fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f32;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
    })
}
