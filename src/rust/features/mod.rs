//! Representation extraction: raw audio to fixed-size MFCC vectors and
//! mel-spectrogram images.

pub mod mel;
pub mod mfcc;
pub mod spectrogram;
pub mod waveform;

pub use mfcc::{FeatureVector, MfccExtractor};
pub use spectrogram::{colormap, SpectrogramExtractor, SpectrogramImage};
pub use waveform::Waveform;

use crate::config::ExtractionConfig;
use crate::error::Result;

/// 40 time-averaged MFCCs using the default MFCC settings. Waveforms at
/// another rate are resampled first.
pub fn extract_mfcc(waveform: &Waveform) -> Result<FeatureVector> {
    let extractor = MfccExtractor::new(ExtractionConfig::mfcc())?;
    let resampled = waveform.resample(extractor.config().target_sample_rate)?;
    extractor.extract(&resampled)
}

/// 128x128 color spectrogram using the default spectrogram settings.
/// Waveforms at another rate are resampled first.
pub fn extract_melspectrogram(waveform: &Waveform) -> Result<SpectrogramImage> {
    let extractor = SpectrogramExtractor::new(ExtractionConfig::spectrogram())?;
    let resampled = waveform.resample(extractor.config().target_sample_rate)?;
    extractor.extract(&resampled)
}
