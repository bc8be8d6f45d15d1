//! Corpus normalization: walks labeled audio corpora laid out under
//! different naming conventions and emits uniform `(path, emotion)` pairs.

pub mod convention;
pub mod metadata;

pub use convention::{CodeTable, NamingConvention};
pub use metadata::{read_metadata, write_metadata};

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};

/// One audio file and the canonical emotion its corpus assigns to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledPath {
    pub path: PathBuf,
    pub emotion: Emotion,
}

impl LabeledPath {
    pub fn new(path: impl Into<PathBuf>, emotion: Emotion) -> Self {
        Self {
            path: path.into(),
            emotion,
        }
    }
}

/// A corpus root together with the convention its files follow.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusSource {
    pub root: PathBuf,
    pub convention: NamingConvention,
}

impl CorpusSource {
    pub fn new(root: impl Into<PathBuf>, convention: NamingConvention) -> Self {
        Self {
            root: root.into(),
            convention,
        }
    }
}

/// Counts from one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub emitted: usize,
    pub unrecognized: usize,
    pub unreadable: usize,
}

/// Normalizes any number of corpora into one sequence of labeled paths.
///
/// Duplicates are preserved. Files whose code maps to no canonical emotion,
/// and files that cannot be opened, are logged and dropped.
#[derive(Debug, Clone, Default)]
pub struct CorpusNormalizer {
    sources: Vec<CorpusSource>,
}

impl CorpusNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, root: impl Into<PathBuf>, convention: NamingConvention) -> Self {
        self.sources.push(CorpusSource::new(root, convention));
        self
    }

    pub fn sources(&self) -> &[CorpusSource] {
        &self.sources
    }

    pub fn normalize(&self) -> Result<Vec<LabeledPath>> {
        let mut all = Vec::new();
        for source in &self.sources {
            let (pairs, stats) = normalize_with_stats(&source.root, &source.convention)?;
            info!(
                "Normalized {:?}: {} labeled, {} unrecognized, {} unreadable",
                source.root, stats.emitted, stats.unrecognized, stats.unreadable
            );
            all.extend(pairs);
        }
        Ok(all)
    }
}

/// Walks `root` recursively and labels every `.wav` file with `convention`.
pub fn normalize(root: &Path, convention: &NamingConvention) -> Result<Vec<LabeledPath>> {
    normalize_with_stats(root, convention).map(|(pairs, _)| pairs)
}

pub fn normalize_with_stats(
    root: &Path,
    convention: &NamingConvention,
) -> Result<(Vec<LabeledPath>, NormalizeStats)> {
    if !root.is_dir() {
        return Err(HearmonyError::CorpusNotFound(root.to_path_buf()));
    }

    let mut pairs = Vec::new();
    let mut stats = NormalizeStats::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {:?}: {}", root, e);
                stats.unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_wav(entry.path()) {
            continue;
        }

        let path = entry.path();
        match convention.resolve(path) {
            Ok(emotion) => {
                if let Err(e) = File::open(path) {
                    warn!("Skipping {:?}: {}", path, e);
                    stats.unreadable += 1;
                    continue;
                }
                pairs.push(LabeledPath::new(path, emotion));
                stats.emitted += 1;
            }
            Err(e) => {
                warn!("{}", e);
                stats.unrecognized += 1;
            }
        }
    }

    Ok((pairs, stats))
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}
