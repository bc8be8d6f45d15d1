use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use lazy_static::lazy_static;
use ndarray::{Array2, Array3, Axis};

use super::mel::{peak_power, power_to_db, MelSpectrogram};
use super::waveform::Waveform;
use crate::config::ExtractionConfig;
use crate::error::{HearmonyError, Result};

// Control points of a perceptually uniform dark-to-light colormap (magma).
const MAGMA_ANCHORS: [(f32, [f32; 3]); 9] = [
    (0.000, [0.0, 0.0, 4.0]),
    (0.125, [28.0, 16.0, 68.0]),
    (0.250, [79.0, 18.0, 123.0]),
    (0.375, [129.0, 37.0, 129.0]),
    (0.500, [181.0, 54.0, 122.0]),
    (0.625, [229.0, 80.0, 100.0]),
    (0.750, [251.0, 135.0, 97.0]),
    (0.875, [254.0, 194.0, 135.0]),
    (1.000, [252.0, 253.0, 191.0]),
];

lazy_static! {
    static ref MAGMA_LUT: Vec<[f32; 3]> = (0..256)
        .map(|i| interpolate_anchor(i as f32 / 255.0))
        .collect();
}

fn interpolate_anchor(t: f32) -> [f32; 3] {
    for pair in MAGMA_ANCHORS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let w = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
            return [
                (c0[0] + w * (c1[0] - c0[0])) / 255.0,
                (c0[1] + w * (c1[1] - c0[1])) / 255.0,
                (c0[2] + w * (c1[2] - c0[2])) / 255.0,
            ];
        }
    }
    let last = MAGMA_ANCHORS[MAGMA_ANCHORS.len() - 1].1;
    [last[0] / 255.0, last[1] / 255.0, last[2] / 255.0]
}

/// Maps an intensity in [0, 1] to an RGB triple in [0, 1].
pub fn colormap(intensity: f32) -> [f32; 3] {
    let index = (intensity.clamp(0.0, 1.0) * 255.0).round() as usize;
    MAGMA_LUT[index.min(255)]
}

/// Square raster of per-clip normalized log mel energy, values in [0, 1],
/// laid out `(channels, height, width)` with low frequencies on the bottom row.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramImage {
    pixels: Array3<f32>,
}

impl SpectrogramImage {
    /// Wraps raw pixels after checking the shape is square with 1 or 3
    /// channels and every value lies in [0, 1].
    pub fn from_pixels(pixels: Array3<f32>) -> Result<Self> {
        let (channels, height, width) = pixels.dim();
        if channels != 1 && channels != 3 {
            return Err(HearmonyError::Validation(format!(
                "Spectrogram images need 1 or 3 channels, got {}",
                channels
            )));
        }
        if height != width || height == 0 {
            return Err(HearmonyError::Validation(format!(
                "Spectrogram images must be square, got {}x{}",
                height, width
            )));
        }
        if pixels.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(HearmonyError::Validation(
                "Pixel intensities must lie in [0, 1]".into(),
            ));
        }
        Ok(Self { pixels })
    }

    pub fn pixels(&self) -> &Array3<f32> {
        &self.pixels
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn size(&self) -> usize {
        self.pixels.dim().1
    }

    /// Three-channel rendering; grayscale images are passed through the colormap.
    pub fn to_rgb(&self) -> SpectrogramImage {
        if self.channels() == 3 {
            return self.clone();
        }
        let gray = self.pixels.index_axis(Axis(0), 0);
        SpectrogramImage {
            pixels: colorize(&gray.to_owned()),
        }
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let size = self.size() as u32;
        let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
        if self.channels() == 1 {
            let img = GrayImage::from_fn(size, size, |x, y| {
                Luma([to_u8(self.pixels[[0, y as usize, x as usize]])])
            });
            img.save(path)?;
        } else {
            let img = RgbImage::from_fn(size, size, |x, y| {
                let (x, y) = (x as usize, y as usize);
                Rgb([
                    to_u8(self.pixels[[0, y, x]]),
                    to_u8(self.pixels[[1, y, x]]),
                    to_u8(self.pixels[[2, y, x]]),
                ])
            });
            img.save(path)?;
        }
        Ok(())
    }

    /// Reads an image file resized to `size`x`size` and scaled to [0, 1]:
    /// three channels when `color` is set, one otherwise. The file must have
    /// been rendered in that mode, so a grayscale export never passes for a
    /// colormapped one.
    pub fn load_png(path: &Path, size: usize, color: bool) -> Result<Self> {
        let img = image::open(path)?;
        if img.color().has_color() != color {
            return Err(HearmonyError::Validation(format!(
                "{:?} is a {} image but {} rendering is configured",
                path,
                if color { "grayscale" } else { "color" },
                if color { "colormap" } else { "grayscale" }
            )));
        }
        let (width, height) = (size as u32, size as u32);
        let pixels = if color {
            let mut rgb = img.to_rgb8();
            if rgb.dimensions() != (width, height) {
                rgb = imageops::resize(&rgb, width, height, FilterType::Triangle);
            }
            Array3::from_shape_fn((3, size, size), |(c, y, x)| {
                f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 255.0
            })
        } else {
            let mut gray = img.to_luma8();
            if gray.dimensions() != (width, height) {
                gray = imageops::resize(&gray, width, height, FilterType::Triangle);
            }
            Array3::from_shape_fn((1, size, size), |(_, y, x)| {
                f32::from(gray.get_pixel(x as u32, y as u32)[0]) / 255.0
            })
        };
        Ok(Self { pixels })
    }
}

/// Renders mel spectrogram images for waveforms already at the configured rate.
pub struct SpectrogramExtractor {
    config: ExtractionConfig,
    mel: MelSpectrogram,
}

impl SpectrogramExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let mel = MelSpectrogram::new(
            config.target_sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
        )?;
        Ok(Self { config, mel })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Loads `path` with this extractor's offset, duration and rate, then extracts.
    pub fn extract_file(&self, path: &Path) -> Result<SpectrogramImage> {
        let waveform = Waveform::load(path, &self.config)?;
        self.extract(&waveform)
    }

    pub fn extract(&self, waveform: &Waveform) -> Result<SpectrogramImage> {
        if waveform.sample_rate() != self.config.target_sample_rate {
            return Err(HearmonyError::Validation(format!(
                "Waveform at {} Hz, extractor expects {} Hz",
                waveform.sample_rate(),
                self.config.target_sample_rate
            )));
        }

        let mel = self.mel.compute(waveform.samples())?;
        let db = power_to_db(&mel, peak_power(&mel), Some(self.config.top_db));
        let gray = rasterize(&db, self.config.image_size, self.config.top_db);

        let pixels = if self.config.color {
            colorize(&gray)
        } else {
            gray.insert_axis(Axis(0))
        };
        Ok(SpectrogramImage { pixels })
    }
}

/// Bilinear resize of a `(mels, frames)` decibel grid to `size`x`size`
/// intensities, flipping the frequency axis so row 0 is the highest band.
fn rasterize(db: &Array2<f32>, size: usize, top_db: f32) -> Array2<f32> {
    let (n_rows, n_cols) = db.dim();
    let source_coord = |dst: usize, src_len: usize| -> (usize, usize, f32) {
        let pos = ((dst as f32 + 0.5) * src_len as f32 / size as f32 - 0.5)
            .clamp(0.0, (src_len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src_len - 1);
        (lo, hi, pos - lo as f32)
    };

    Array2::from_shape_fn((size, size), |(row, col)| {
        let (y0, y1, wy) = source_coord(size - 1 - row, n_rows);
        let (x0, x1, wx) = source_coord(col, n_cols);
        let top = db[[y0, x0]] * (1.0 - wx) + db[[y0, x1]] * wx;
        let bottom = db[[y1, x0]] * (1.0 - wx) + db[[y1, x1]] * wx;
        let value = top * (1.0 - wy) + bottom * wy;
        ((value + top_db) / top_db).clamp(0.0, 1.0)
    })
}

fn colorize(gray: &Array2<f32>) -> Array3<f32> {
    let (h, w) = gray.dim();
    Array3::from_shape_fn((3, h, w), |(c, y, x)| colormap(gray[[y, x]])[c])
}
