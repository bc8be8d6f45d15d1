//! Dataset assembly: extraction over normalized pairs, label encoding and
//! the seeded train/held-out partition.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::ExtractionConfig;
use crate::corpus::LabeledPath;
use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};
use crate::features::{FeatureVector, MfccExtractor, SpectrogramExtractor, SpectrogramImage};

/// Bijection between the observed canonical labels and `0..n`.
///
/// Classes are kept in sorted order, so fitting the same label set always
/// yields the same indices regardless of the order examples were seen in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelEncoding {
    classes: Vec<Emotion>,
}

impl LabelEncoding {
    pub fn fit<I>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = Emotion>,
    {
        let classes: Vec<Emotion> = labels
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.is_empty() {
            return Err(HearmonyError::EmptyDataset);
        }
        Ok(Self { classes })
    }

    /// Rebuilds an encoding from a persisted class list, which must already
    /// be sorted and free of duplicates.
    pub fn from_classes(classes: Vec<Emotion>) -> Result<Self> {
        if classes.is_empty() {
            return Err(HearmonyError::Validation("Label list is empty".into()));
        }
        if classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HearmonyError::Validation(
                "Label list must be sorted and contain no duplicates".into(),
            ));
        }
        Ok(Self { classes })
    }

    pub fn classes(&self) -> &[Emotion] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, emotion: Emotion) -> Result<usize> {
        self.classes.binary_search(&emotion).map_err(|_| {
            HearmonyError::Validation(format!("'{}' is not in the label encoding", emotion))
        })
    }

    pub fn decode(&self, index: usize) -> Result<Emotion> {
        self.classes.get(index).copied().ok_or_else(|| {
            HearmonyError::Validation(format!(
                "Class index {} out of range for {} labels",
                index,
                self.classes.len()
            ))
        })
    }

    pub fn one_hot(&self, emotion: Emotion) -> Result<Array1<f32>> {
        let mut target = Array1::zeros(self.classes.len());
        target[self.encode(emotion)?] = 1.0;
        Ok(target)
    }
}

/// A representation paired with its canonical label. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample<T> {
    representation: T,
    emotion: Emotion,
    source: Option<PathBuf>,
}

impl<T> LabeledExample<T> {
    pub fn new(representation: T, emotion: Emotion) -> Self {
        Self {
            representation,
            emotion,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn representation(&self) -> &T {
        &self.representation
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Disjoint index sets whose union covers the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Dataset<T> {
    examples: Vec<LabeledExample<T>>,
    encoding: LabelEncoding,
}

impl<T> Dataset<T> {
    /// Fits the label encoding over `examples`. Fails with `EmptyDataset`
    /// when there is nothing to encode.
    pub fn new(examples: Vec<LabeledExample<T>>) -> Result<Self> {
        if examples.is_empty() {
            return Err(HearmonyError::EmptyDataset);
        }
        let encoding = LabelEncoding::fit(examples.iter().map(|e| e.emotion))?;
        Ok(Self { examples, encoding })
    }

    pub fn examples(&self) -> &[LabeledExample<T>] {
        &self.examples
    }

    pub fn encoding(&self) -> &LabelEncoding {
        &self.encoding
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Encoded label for every example, in dataset order.
    pub fn targets(&self) -> Vec<usize> {
        self.examples
            .iter()
            .filter_map(|e| self.encoding.encode(e.emotion).ok())
            .collect()
    }

    /// Shuffles indices with a seeded generator and holds out
    /// `ceil(len * test_fraction)` of them, always leaving at least one
    /// training example.
    pub fn split(&self, test_fraction: f64, seed: u64) -> Result<Split> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(HearmonyError::Validation(format!(
                "Test fraction must be in [0, 1), got {}",
                test_fraction
            )));
        }
        let n = self.examples.len();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        // Rounded before ceil so that 0.2 of 500 is 100, not 101
        let exact = (n as f64 * test_fraction * 1e9).round() / 1e9;
        let n_test = (exact.ceil() as usize).min(n.saturating_sub(1));
        let train = indices.split_off(n_test);
        Ok(Split {
            train,
            test: indices,
        })
    }

    pub fn select(&self, indices: &[usize]) -> Vec<&LabeledExample<T>> {
        indices.iter().filter_map(|&i| self.examples.get(i)).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MfccExport {
    classes: Vec<Emotion>,
    features: Vec<Vec<f32>>,
    labels: Vec<usize>,
}

impl Dataset<FeatureVector> {
    /// Writes the feature matrix, encoded labels and class list as JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let export = MfccExport {
            classes: self.encoding.classes().to_vec(),
            features: self.examples.iter().map(|e| e.representation.to_vec()).collect(),
            labels: self.targets(),
        };
        let json = serde_json::to_string(&export)
            .map_err(|e| HearmonyError::Validation(format!("Serialize features failed: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!("Saved {} MFCC vectors to {:?}", self.examples.len(), path);
        Ok(())
    }
}

/// Counts from a spectrogram export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub written: usize,
    pub skipped: usize,
}

/// Runs the extractors over normalized pairs. Files that fail to decode are
/// logged and dropped; any other failure aborts the run.
#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    mfcc: ExtractionConfig,
    spectrogram: ExtractionConfig,
}

impl Default for DatasetAssembler {
    fn default() -> Self {
        Self {
            mfcc: ExtractionConfig::mfcc(),
            spectrogram: ExtractionConfig::spectrogram(),
        }
    }
}

impl DatasetAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mfcc_config(mut self, config: ExtractionConfig) -> Self {
        self.mfcc = config;
        self
    }

    pub fn with_spectrogram_config(mut self, config: ExtractionConfig) -> Self {
        self.spectrogram = config;
        self
    }

    pub fn assemble_mfcc(&self, pairs: &[LabeledPath]) -> Result<Dataset<FeatureVector>> {
        let extractor = MfccExtractor::new(self.mfcc.clone())?;
        assemble_with(pairs, |path| extractor.extract_file(path))
    }

    pub fn assemble_spectrograms(&self, pairs: &[LabeledPath]) -> Result<Dataset<SpectrogramImage>> {
        let extractor = SpectrogramExtractor::new(self.spectrogram.clone())?;
        assemble_with(pairs, |path| extractor.extract_file(path))
    }

    /// Renders every pair to `<out_dir>/<emotion>/<stem>.png`.
    pub fn export_spectrograms(&self, pairs: &[LabeledPath], out_dir: &Path) -> Result<ExportStats> {
        let extractor = SpectrogramExtractor::new(self.spectrogram.clone())?;
        let mut stats = ExportStats::default();

        for pair in pairs {
            let image = match extractor.extract_file(&pair.path) {
                Ok(image) => image,
                Err(e) if e.is_per_file() => {
                    warn!("Skipping {:?}: {}", pair.path, e);
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let folder = out_dir.join(pair.emotion.as_str());
            fs::create_dir_all(&folder)?;
            let stem = pair
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("clip_{}", stats.written));
            let mut target = folder.join(format!("{}.png", stem));
            let mut suffix = 1;
            while target.exists() {
                target = folder.join(format!("{}_{}.png", stem, suffix));
                suffix += 1;
            }
            image.save_png(&target)?;
            stats.written += 1;
        }

        info!(
            "Exported {} spectrograms to {:?} ({} skipped)",
            stats.written, out_dir, stats.skipped
        );
        Ok(stats)
    }

    /// Loads a `<root>/<emotion>/*.png` tree produced by `export_spectrograms`.
    /// Folders that are not canonical emotions and unreadable images are skipped.
    pub fn from_image_folder(&self, root: &Path) -> Result<Dataset<SpectrogramImage>> {
        if !root.is_dir() {
            return Err(HearmonyError::CorpusNotFound(root.to_path_buf()));
        }
        let (size, color) = (self.spectrogram.image_size, self.spectrogram.color);
        let mut examples = Vec::new();

        for entry in WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let is_png = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
            if !is_png {
                continue;
            }
            let folder = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let emotion = match folder.parse::<Emotion>() {
                Ok(emotion) => emotion,
                Err(_) => {
                    warn!("Skipping {:?}: folder '{}' is not an emotion", path, folder);
                    continue;
                }
            };
            match SpectrogramImage::load_png(path, size, color) {
                Ok(image) => examples.push(LabeledExample::new(image, emotion).with_source(path)),
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }

        info!("Loaded {} spectrogram images from {:?}", examples.len(), root);
        Dataset::new(examples)
    }
}

fn assemble_with<T, F>(pairs: &[LabeledPath], mut extract: F) -> Result<Dataset<T>>
where
    F: FnMut(&Path) -> Result<T>,
{
    let mut examples = Vec::with_capacity(pairs.len());
    let mut skipped = 0usize;

    for pair in pairs {
        match extract(&pair.path) {
            Ok(representation) => examples.push(
                LabeledExample::new(representation, pair.emotion).with_source(&pair.path),
            ),
            Err(e) if e.is_per_file() => {
                warn!("Skipping {:?}: {}", pair.path, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Assembled {} examples ({} skipped)",
        examples.len(),
        skipped
    );
    Dataset::new(examples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy(labels: &[Emotion]) -> Dataset<u32> {
        Dataset::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, &e)| LabeledExample::new(i as u32, e))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_encoding_is_sorted_regardless_of_input_order() {
        let a = LabelEncoding::fit([Emotion::Sad, Emotion::Angry, Emotion::Sad]).unwrap();
        let b = LabelEncoding::fit([Emotion::Angry, Emotion::Sad]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.classes(), &[Emotion::Angry, Emotion::Sad]);
        assert_eq!(a.encode(Emotion::Sad).unwrap(), 1);
        assert_eq!(a.decode(0).unwrap(), Emotion::Angry);
        assert!(a.encode(Emotion::Happy).is_err());
        assert!(a.decode(2).is_err());
        assert_eq!(a.one_hot(Emotion::Sad).unwrap().to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_from_classes_requires_sorted_unique() {
        assert!(LabelEncoding::from_classes(vec![Emotion::Angry, Emotion::Sad]).is_ok());
        assert!(LabelEncoding::from_classes(vec![Emotion::Sad, Emotion::Angry]).is_err());
        assert!(LabelEncoding::from_classes(vec![Emotion::Sad, Emotion::Sad]).is_err());
        assert!(LabelEncoding::from_classes(vec![]).is_err());
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let result = Dataset::<u32>::new(Vec::new());
        assert!(matches!(result, Err(HearmonyError::EmptyDataset)));
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let data = toy(&[Emotion::Happy; 10]);
        let split = data.split(0.2, 42).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);

        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_holds_out_exactly_a_fifth_of_large_corpora() {
        for (n, expected) in [(50, 10), (500, 100), (1_000, 200), (12_000, 2_400), (10_001, 2_001)] {
            let examples = (0..n).map(|_| LabeledExample::new((), Emotion::Happy)).collect();
            let data = Dataset::new(examples).unwrap();
            let split = data.split(0.2, 42).unwrap();
            assert_eq!(split.test.len(), expected, "n = {}", n);
            assert_eq!(split.train.len(), n - expected);
        }
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let data = toy(&[Emotion::Happy, Emotion::Sad, Emotion::Calm, Emotion::Angry, Emotion::Sad]);
        assert_eq!(data.split(0.2, 7).unwrap(), data.split(0.2, 7).unwrap());
    }

    #[test]
    fn test_split_keeps_a_training_example() {
        let single = toy(&[Emotion::Happy]);
        let split = single.split(0.2, 42).unwrap();
        assert_eq!(split.train, vec![0]);
        assert!(split.test.is_empty());

        let pair = toy(&[Emotion::Happy, Emotion::Sad]);
        let split = pair.split(0.9, 42).unwrap();
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.test.len(), 1);
    }
}
