//! `filepath,emotion` metadata files.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::LabeledPath;
use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};

const HEADER: &str = "filepath,emotion";

/// Writes one row per pair. Paths with line breaks cannot be stored one
/// row per line and are rejected before anything is written.
pub fn write_metadata(path: &Path, pairs: &[LabeledPath]) -> Result<()> {
    if let Some(bad) = pairs
        .iter()
        .find(|pair| pair.path.to_string_lossy().contains(['\n', '\r']))
    {
        return Err(HearmonyError::Validation(format!(
            "Path {:?} contains a line break and cannot be written to metadata",
            bad.path
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "{}", HEADER)?;
    for pair in pairs {
        writeln!(
            out,
            "{},{}",
            quote(&pair.path.to_string_lossy()),
            pair.emotion
        )?;
    }
    out.flush()?;
    info!("Wrote {} metadata rows to {:?}", pairs.len(), path);
    Ok(())
}

/// Reads rows back. Rows whose label is not a canonical emotion are logged
/// and dropped; a malformed row is a validation error.
pub fn read_metadata(path: &Path) -> Result<Vec<LabeledPath>> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines().enumerate();

    match lines.next() {
        Some((_, header)) if header.trim() == HEADER => {}
        _ => {
            return Err(HearmonyError::Validation(format!(
                "{:?} does not start with the '{}' header",
                path, HEADER
            )))
        }
    }

    let mut pairs = Vec::new();
    for (number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_row(line).ok_or_else(|| {
            HearmonyError::Validation(format!("Malformed row {} in {:?}", number + 1, path))
        })?;
        let [filepath, label] = <[String; 2]>::try_from(fields).map_err(|fields| {
            HearmonyError::Validation(format!(
                "Row {} in {:?} has {} fields, expected 2",
                number + 1,
                path,
                fields.len()
            ))
        })?;

        match label.parse::<Emotion>() {
            Ok(emotion) => pairs.push(LabeledPath::new(PathBuf::from(filepath), emotion)),
            Err(_) => warn!(
                "{}",
                HearmonyError::UnrecognizedLabel {
                    path: PathBuf::from(filepath),
                    code: label,
                }
            ),
        }
    }
    Ok(pairs)
}

fn quote(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Splits one row into fields, honoring double-quoted fields. `None` on an
/// unterminated quote.
fn split_row(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    fields.push(current);
    Some(fields)
}
