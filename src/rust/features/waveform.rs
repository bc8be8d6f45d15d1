use std::path::Path;

use hound::{SampleFormat, WavReader};
use log::debug;
use rubato::{FftFixedIn, Resampler};

use crate::config::ExtractionConfig;
use crate::error::{HearmonyError, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Mono PCM samples at a known rate.
///
/// Transforms never mutate a waveform in place; each returns a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Decodes a WAV file, downmixes it to mono, applies the configured
    /// offset and duration, and resamples to the target rate.
    pub fn load(path: &Path, config: &ExtractionConfig) -> Result<Self> {
        let decoded = Self::decode(path)?;
        let windowed = decoded.window(config.offset_secs, config.max_duration_secs);
        windowed
            .resample(config.target_sample_rate)
            .map_err(|e| match e {
                HearmonyError::Decode { reason, .. } => HearmonyError::decode(path, reason),
                other => other,
            })
    }

    /// Decodes a WAV file at its native rate.
    pub fn decode(path: &Path) -> Result<Self> {
        let mut reader = WavReader::open(path).map_err(|e| HearmonyError::decode(path, e))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| HearmonyError::decode(path, e))?,
            SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(HearmonyError::decode(
                        path,
                        format!("unsupported bit depth {}", spec.bits_per_sample),
                    ));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| HearmonyError::decode(path, e))?
            }
        };

        if interleaved.is_empty() {
            return Err(HearmonyError::decode(path, "file contains no samples"));
        }

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        debug!(
            "Decoded {:?}: {} Hz, {} channel(s), {} frames",
            path,
            spec.sample_rate,
            channels,
            samples.len()
        );
        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Skips `offset_secs` and keeps at most `duration_secs` of audio.
    pub fn window(&self, offset_secs: f32, duration_secs: Option<f32>) -> Self {
        let rate = self.sample_rate as f32;
        let start = ((offset_secs.max(0.0) * rate).round() as usize).min(self.samples.len());
        let end = match duration_secs {
            Some(d) => (start + (d.max(0.0) * rate).round() as usize).min(self.samples.len()),
            None => self.samples.len(),
        };
        Self::new(self.samples[start..end].to_vec(), self.sample_rate)
    }

    /// Band-limited conversion to `target_rate`.
    ///
    /// The output holds `ceil(len * target / source)` samples, aligned with
    /// the input (the resampler's latency is trimmed).
    pub fn resample(&self, target_rate: u32) -> Result<Self> {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(Self::new(self.samples.clone(), target_rate));
        }
        if self.sample_rate == 0 || target_rate == 0 {
            return Err(HearmonyError::Validation("Sample rates must be positive".into()));
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            target_rate as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| HearmonyError::decode("<memory>", format!("resampler setup failed: {}", e)))?;

        let expected = (self.samples.len() as u64 * u64::from(target_rate))
            .div_ceil(u64::from(self.sample_rate)) as usize;
        let delay = resampler.output_delay();

        let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
        let mut chunk = vec![vec![0.0f32; RESAMPLE_CHUNK]];
        let mut position = 0;

        while output.len() < expected + delay {
            let needed = resampler.input_frames_next();
            chunk[0].clear();
            let available = self.samples.len().saturating_sub(position).min(needed);
            chunk[0].extend_from_slice(&self.samples[position..position + available]);
            chunk[0].resize(needed, 0.0);
            position += available;

            let frames = resampler
                .process(&chunk, None)
                .map_err(|e| HearmonyError::decode("<memory>", format!("resampling failed: {}", e)))?;
            if frames[0].is_empty() {
                break;
            }
            output.extend_from_slice(&frames[0]);
        }

        let mut samples: Vec<f32> = output.into_iter().skip(delay).collect();
        samples.resize(expected, 0.0);
        Ok(Self::new(samples, target_rate))
    }
}
