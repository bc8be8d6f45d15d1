//! Per-corpus rules for reading an emotion code out of a file path.
//!
//! Each convention carries its own code table, so the normalizer receives
//! the whole mapping as plain data and never consults global state.

use std::collections::BTreeMap;
use std::path::Path;

use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};

/// Corpus-specific code to canonical emotion.
pub type CodeTable = BTreeMap<String, Emotion>;

fn table(entries: &[(&str, Emotion)]) -> CodeTable {
    entries
        .iter()
        .map(|(code, emotion)| (code.to_string(), *emotion))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamingConvention {
    /// Two-digit code at a fixed token of the file stem, e.g. `03-01-05-01-02-01-12`.
    NumericCode {
        delimiter: char,
        position: usize,
        table: CodeTable,
    },
    /// Three-letter code at a fixed token of the file stem, e.g. `1001_DFA_ANG_XX`.
    LetterCode {
        delimiter: char,
        position: usize,
        table: CodeTable,
    },
    /// One or two letter prefix of a token, e.g. `DC_sa01`. The two-letter
    /// key is tried before the one-letter key.
    LetterPrefix {
        delimiter: char,
        position: usize,
        table: CodeTable,
    },
    /// Last token of the containing directory name, lowercased, e.g. `OAF_angry/`.
    DirectorySuffix { delimiter: char, table: CodeTable },
}

impl NamingConvention {
    /// RAVDESS: third hyphen-separated token.
    pub fn ravdess() -> Self {
        Self::NumericCode {
            delimiter: '-',
            position: 2,
            table: table(&[
                ("01", Emotion::Neutral),
                ("02", Emotion::Calm),
                ("03", Emotion::Happy),
                ("04", Emotion::Sad),
                ("05", Emotion::Angry),
                ("06", Emotion::Fearful),
                ("07", Emotion::Disgust),
                ("08", Emotion::Surprised),
            ]),
        }
    }

    /// CREMA-D: third underscore-separated token. Neutral speech is filed as calm.
    pub fn crema() -> Self {
        Self::LetterCode {
            delimiter: '_',
            position: 2,
            table: table(&[
                ("ANG", Emotion::Angry),
                ("DIS", Emotion::Disgust),
                ("FEA", Emotion::Fearful),
                ("HAP", Emotion::Happy),
                ("NEU", Emotion::Calm),
                ("SAD", Emotion::Sad),
            ]),
        }
    }

    /// SAVEE: speaker initials, then a letter prefix and take number.
    pub fn savee() -> Self {
        Self::LetterPrefix {
            delimiter: '_',
            position: 1,
            table: table(&[
                ("a", Emotion::Angry),
                ("d", Emotion::Disgust),
                ("f", Emotion::Fearful),
                ("h", Emotion::Happy),
                ("n", Emotion::Calm),
                ("sa", Emotion::Sad),
                ("su", Emotion::Surprised),
            ]),
        }
    }

    /// TESS: `<speaker>_<emotion>` directories.
    pub fn tess() -> Self {
        let mut codes = table(&[
            ("fear", Emotion::Fearful),
            ("surprise", Emotion::Surprised),
            ("ps", Emotion::Surprised),
        ]);
        for emotion in Emotion::ALL {
            codes.insert(emotion.as_str().to_string(), emotion);
        }
        Self::DirectorySuffix {
            delimiter: '_',
            table: codes,
        }
    }

    /// Looks a preset up by corpus name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ravdess" => Ok(Self::ravdess()),
            "crema" | "crema-d" | "cremad" => Ok(Self::crema()),
            "savee" => Ok(Self::savee()),
            "tess" => Ok(Self::tess()),
            other => Err(HearmonyError::Validation(format!(
                "Unknown corpus convention '{}' (expected ravdess, crema, savee or tess)",
                other
            ))),
        }
    }

    pub fn table(&self) -> &CodeTable {
        match self {
            Self::NumericCode { table, .. }
            | Self::LetterCode { table, .. }
            | Self::LetterPrefix { table, .. }
            | Self::DirectorySuffix { table, .. } => table,
        }
    }

    /// Maps a path to its canonical emotion, or `UnrecognizedLabel` carrying
    /// the code that was read (empty when the expected token is absent).
    pub fn resolve(&self, path: &Path) -> Result<Emotion> {
        let unrecognized = |code: &str| HearmonyError::UnrecognizedLabel {
            path: path.to_path_buf(),
            code: code.to_string(),
        };

        match self {
            Self::NumericCode {
                delimiter,
                position,
                table,
            } => {
                let code = stem_token(path, *delimiter, *position).unwrap_or_default();
                if code.len() != 2 || !code.chars().all(|c| c.is_ascii_digit()) {
                    return Err(unrecognized(&code));
                }
                table.get(&code).copied().ok_or_else(|| unrecognized(&code))
            }
            Self::LetterCode {
                delimiter,
                position,
                table,
            } => {
                let code = stem_token(path, *delimiter, *position).unwrap_or_default();
                let key = code.to_ascii_uppercase();
                table.get(&key).copied().ok_or_else(|| unrecognized(&code))
            }
            Self::LetterPrefix {
                delimiter,
                position,
                table,
            } => {
                let token = stem_token(path, *delimiter, *position).unwrap_or_default();
                let letters: String = token
                    .chars()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                let two: String = letters.chars().take(2).collect();
                let one: String = letters.chars().take(1).collect();
                table
                    .get(&two)
                    .or_else(|| table.get(&one))
                    .copied()
                    .ok_or_else(|| unrecognized(&token))
            }
            Self::DirectorySuffix { delimiter, table } => {
                let folder = path
                    .parent()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let code = folder
                    .rsplit(*delimiter)
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();
                table.get(&code).copied().ok_or_else(|| unrecognized(&code))
            }
        }
    }
}

fn stem_token(path: &Path, delimiter: char, position: usize) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    stem.split(delimiter).nth(position).map(str::to_string)
}
