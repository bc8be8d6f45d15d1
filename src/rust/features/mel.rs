//! Mel-scaled power spectrograms.
//!
//! Frames are centered (the signal is zero-padded by `n_fft / 2` on both
//! sides), windowed with a periodic Hann window, and projected onto a
//! Slaney-style mel filterbank with area normalization.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{HearmonyError, Result};

/// Floor applied before taking logarithms
pub const AMIN: f32 = 1e-10;

/// Pre-planned STFT and filterbank for one (sample rate, n_fft, n_mels) setup.
pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    filterbank: Array2<f32>,
}

impl MelSpectrogram {
    pub fn new(sample_rate: u32, n_fft: usize, hop_length: usize, n_mels: usize) -> Result<Self> {
        if n_fft < 2 || hop_length == 0 || n_mels == 0 {
            return Err(HearmonyError::Validation(format!(
                "Invalid mel parameters: n_fft={}, hop_length={}, n_mels={}",
                n_fft, hop_length, n_mels
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Ok(Self {
            n_fft,
            hop_length,
            fft,
            window: hann_window(n_fft),
            filterbank: mel_filterbank(sample_rate as f32, n_fft, n_mels),
        })
    }

    pub fn n_mels(&self) -> usize {
        self.filterbank.nrows()
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        let padded = (len + 2 * (self.n_fft / 2)).max(self.n_fft);
        1 + (padded - self.n_fft) / self.hop_length
    }

    /// Power spectrogram, shape `(n_fft / 2 + 1, frames)`.
    pub fn power_spectrum(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; (samples.len() + 2 * pad).max(self.n_fft)];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = self.frame_count(samples.len());
        let n_bins = self.n_fft / 2 + 1;
        let mut power = Array2::<f32>::zeros((n_bins, n_frames));

        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();

        for frame in 0..n_frames {
            let start = frame * self.hop_length;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = padded[start + i] * self.window[i];
            }
            self.fft
                .process(&mut input, &mut spectrum)
                .map_err(|e| HearmonyError::Validation(format!("FFT failed: {}", e)))?;
            for (bin, c) in spectrum.iter().enumerate() {
                power[[bin, frame]] = c.re * c.re + c.im * c.im;
            }
        }

        Ok(power)
    }

    /// Mel power spectrogram, shape `(n_mels, frames)`.
    pub fn compute(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let power = self.power_spectrum(samples)?;
        Ok(self.filterbank.dot(&power))
    }
}

/// Converts power values to decibels relative to `reference`, keeping
/// `top_db` of dynamic range below the peak.
pub fn power_to_db(power: &Array2<f32>, reference: f32, top_db: Option<f32>) -> Array2<f32> {
    let ref_db = 10.0 * reference.max(AMIN).log10();
    let mut db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - ref_db);
    if let Some(range) = top_db {
        let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - range;
        db.mapv_inplace(|v| v.max(floor));
    }
    db
}

/// Largest value in a power spectrogram, used as the per-clip reference.
pub fn peak_power(power: &Array2<f32>) -> f32 {
    power.iter().copied().fold(0.0, f32::max)
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

pub(crate) fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub(crate) fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular filters spanning 0 Hz to Nyquist, shape `(n_mels, n_fft / 2 + 1)`.
pub(crate) fn mel_filterbank(sample_rate: f32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate / 2.0;

    let fft_freqs: Array1<f32> =
        Array1::from_iter((0..n_bins).map(|i| i as f32 * sample_rate / n_fft as f32));

    let mel_max = hz_to_mel(nyquist);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let rise = (center - left).max(f32::EPSILON);
        let fall = (right - center).max(f32::EPSILON);
        let enorm = 2.0 / (right - left).max(f32::EPSILON);

        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / rise;
            let upper = (right - freq) / fall;
            weights[[m, bin]] = lower.min(upper).max(0.0) * enorm;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 300.0, 999.0, 1000.0, 4000.0, 11_025.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((hz - back).abs() < 0.05, "roundtrip failed for {} Hz", hz);
        }
        // Linear region
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_filterbank_shape_and_coverage() {
        let fb = mel_filterbank(22_050.0, 2048, 128);
        assert_eq!(fb.dim(), (128, 1025));
        assert!(fb.iter().all(|&w| w >= 0.0));
        for (m, row) in fb.rows().into_iter().enumerate() {
            assert!(row.sum() > 0.0, "filter {} is empty", m);
        }
    }

    #[test]
    fn test_frame_count_is_centered() {
        let mel = MelSpectrogram::new(22_050, 2048, 512, 128).unwrap();
        let spec = mel.compute(&vec![0.0; 22_050]).unwrap();
        assert_eq!(spec.dim(), (128, mel.frame_count(22_050)));
        assert_eq!(spec.ncols(), 44);

        // Shorter than one window still yields a frame
        let short = mel.compute(&[0.1; 10]).unwrap();
        assert_eq!(short.ncols(), 1);
    }

    #[test]
    fn test_tone_energy_lands_near_its_frequency() {
        let rate = 22_050;
        let samples: Vec<f32> = (0..rate)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / rate as f32).sin())
            .collect();
        let mel = MelSpectrogram::new(rate as u32, 2048, 512, 64).unwrap();
        let spec = mel.compute(&samples).unwrap();

        let energy: Vec<f32> = spec.rows().into_iter().map(|r| r.sum()).collect();
        let peak_band = energy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let points: Vec<f32> = (0..66)
            .map(|i| mel_to_hz(hz_to_mel(11_025.0) * i as f32 / 65.0))
            .collect();
        assert!(points[peak_band] < 1000.0 && points[peak_band + 2] > 1000.0);
    }

    #[test]
    fn test_power_to_db_clips_dynamic_range() {
        let power = Array2::from_shape_vec((1, 3), vec![1.0, 1e-3, 1e-12]).unwrap();
        let db = power_to_db(&power, 1.0, Some(80.0));
        assert!((db[[0, 0]] - 0.0).abs() < 1e-4);
        assert!((db[[0, 1]] + 30.0).abs() < 1e-3);
        assert!((db[[0, 2]] + 80.0).abs() < 1e-3);

        let relative = power_to_db(&power, peak_power(&power), None);
        assert!((relative[[0, 2]] + 100.0).abs() < 1e-3);
    }
}
