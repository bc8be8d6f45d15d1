//! Confidence calibration: makes a designated winner the dominant label of
//! a score vector and reports a ranked top-k.
//!
//! The steps are applied in a fixed order:
//!
//! 1. If the winner does not hold the maximum probability, its value is
//!    swapped with the current maximum's (the sum is unchanged).
//! 2. If the winner is still below the minimum confidence, it is raised to
//!    exactly that value and every other label is scaled by
//!    `(1 - new) / (1 - old)`, so the vector still sums to 1.
//! 3. Labels are sorted by probability, descending. Among equal
//!    probabilities the winner comes first, then vocabulary order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};

/// Allowed deviation of a score vector's sum from 1.
pub const SUM_TOLERANCE: f64 = 1e-4;

/// One probability per known emotion, in vocabulary order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    entries: Vec<(Emotion, f64)>,
}

impl ScoreVector {
    /// Validates that labels are distinct and probabilities are finite,
    /// non-negative and sum to 1 within [`SUM_TOLERANCE`].
    pub fn new(entries: Vec<(Emotion, f64)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(HearmonyError::Validation("Score vector is empty".into()));
        }
        for (i, (label, p)) in entries.iter().enumerate() {
            if !p.is_finite() || *p < 0.0 {
                return Err(HearmonyError::Validation(format!(
                    "Probability for '{}' is invalid: {}",
                    label, p
                )));
            }
            if entries[..i].iter().any(|(other, _)| other == label) {
                return Err(HearmonyError::Validation(format!(
                    "Label '{}' appears twice in score vector",
                    label
                )));
            }
        }
        let sum: f64 = entries.iter().map(|(_, p)| p).sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(HearmonyError::Validation(format!(
                "Score vector sums to {}, expected 1",
                sum
            )));
        }
        Ok(Self { entries })
    }

    /// Pairs `labels` with classifier output, index for index.
    pub fn from_probabilities(labels: &[Emotion], probabilities: &[f32]) -> Result<Self> {
        if labels.len() != probabilities.len() {
            return Err(HearmonyError::Validation(format!(
                "{} labels but {} probabilities",
                labels.len(),
                probabilities.len()
            )));
        }
        Self::new(
            labels
                .iter()
                .copied()
                .zip(probabilities.iter().map(|&p| f64::from(p)))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[(Emotion, f64)] {
        &self.entries
    }

    pub fn labels(&self) -> Vec<Emotion> {
        self.entries.iter().map(|(e, _)| *e).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn probability(&self, emotion: Emotion) -> Option<f64> {
        self.entries
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, p)| *p)
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|(_, p)| p).sum()
    }

    /// Label with the highest probability; the earliest one on ties.
    pub fn argmax(&self) -> Emotion {
        let mut best = self.entries[0];
        for &(label, p) in &self.entries[1..] {
            if p > best.1 {
                best = (label, p);
            }
        }
        best.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedEmotion {
    pub emotion: Emotion,
    pub probability: f64,
}

impl RankedEmotion {
    pub fn percent(&self) -> f64 {
        self.probability * 100.0
    }
}

impl fmt::Display for RankedEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1}%", self.emotion.title(), self.percent())
    }
}

/// Final output of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub emotion: Emotion,
    pub confidence: f64,
    pub top: Vec<RankedEmotion>,
    pub calibrated: ScoreVector,
}

#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        if !(0.0..1.0).contains(&config.min_confidence) {
            return Err(HearmonyError::Validation(format!(
                "Minimum confidence must be in [0, 1), got {}",
                config.min_confidence
            )));
        }
        if config.top_k == 0 {
            return Err(HearmonyError::Validation("top_k must be positive".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn calibrate(&self, raw: &ScoreVector, winner: Emotion) -> Result<PredictionResult> {
        let labels = raw.labels();
        let w = labels.iter().position(|&e| e == winner).ok_or_else(|| {
            HearmonyError::Validation(format!("Winner '{}' is not in the score vector", winner))
        })?;
        let mut probs: Vec<f64> = raw.entries.iter().map(|(_, p)| *p).collect();

        // 1. Value swap with the current maximum
        let max_index = probs
            .iter()
            .enumerate()
            .fold(0, |best, (i, &p)| if p > probs[best] { i } else { best });
        if probs[w] < probs[max_index] {
            probs.swap(w, max_index);
        }

        // 2. Floor with proportional shrink of the rest
        let floor = self.config.min_confidence;
        let old = probs[w];
        if old < floor {
            let factor = (1.0 - floor) / (1.0 - old);
            for (i, p) in probs.iter_mut().enumerate() {
                *p = if i == w { floor } else { *p * factor };
            }
        }

        // 3. Rank
        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| (b == w).cmp(&(a == w)))
                .then_with(|| a.cmp(&b))
        });
        let top = order
            .iter()
            .take(self.config.top_k)
            .map(|&i| RankedEmotion {
                emotion: labels[i],
                probability: probs[i],
            })
            .collect();

        let calibrated = ScoreVector {
            entries: labels.iter().copied().zip(probs.iter().copied()).collect(),
        };
        Ok(PredictionResult {
            emotion: winner,
            confidence: probs[w],
            top,
            calibrated,
        })
    }
}

/// Calibrates with the default threshold (0.4) and top-3 ranking.
pub fn calibrate(raw: &ScoreVector, winner: Emotion) -> Result<PredictionResult> {
    Calibrator::default().calibrate(raw, winner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(Emotion, f64)]) -> ScoreVector {
        ScoreVector::new(entries.to_vec()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_vectors() {
        assert!(ScoreVector::new(vec![]).is_err());
        assert!(ScoreVector::new(vec![(Emotion::Happy, 0.5), (Emotion::Sad, 0.4)]).is_err());
        assert!(ScoreVector::new(vec![(Emotion::Happy, 1.2), (Emotion::Sad, -0.2)]).is_err());
        assert!(ScoreVector::new(vec![(Emotion::Happy, 0.5), (Emotion::Happy, 0.5)]).is_err());
    }

    #[test]
    fn test_unknown_winner_is_rejected() {
        let raw = scores(&[(Emotion::Happy, 0.6), (Emotion::Sad, 0.4)]);
        assert!(calibrate(&raw, Emotion::Angry).is_err());
    }

    #[test]
    fn test_threshold_boost_renormalizes() {
        let raw = scores(&[
            (Emotion::Happy, 0.25),
            (Emotion::Sad, 0.25),
            (Emotion::Angry, 0.25),
            (Emotion::Calm, 0.25),
        ]);
        let result = calibrate(&raw, Emotion::Calm).unwrap();
        assert_eq!(result.emotion, Emotion::Calm);
        assert!((result.confidence - 0.4).abs() < 1e-12);
        assert!((result.calibrated.sum() - 1.0).abs() < 1e-12);
        assert!((result.calibrated.probability(Emotion::Happy).unwrap() - 0.2).abs() < 1e-12);
        // Winner leads even though the rest tie among themselves
        assert_eq!(result.top[0].emotion, Emotion::Calm);
        assert_eq!(result.top[1].emotion, Emotion::Happy);
        assert_eq!(result.top[2].emotion, Emotion::Sad);
    }

    #[test]
    fn test_tied_winner_ranks_first() {
        let raw = scores(&[(Emotion::Happy, 0.45), (Emotion::Sad, 0.45), (Emotion::Calm, 0.10)]);
        let result = calibrate(&raw, Emotion::Sad).unwrap();
        assert_eq!(result.calibrated.probability(Emotion::Sad), Some(0.45));
        assert_eq!(result.top[0].emotion, Emotion::Sad);
        assert_eq!(result.top[1].emotion, Emotion::Happy);
    }

    #[test]
    fn test_top_k_is_configurable() {
        let calibrator = Calibrator::new(CalibrationConfig {
            min_confidence: 0.5,
            top_k: 2,
        })
        .unwrap();
        let raw = scores(&[(Emotion::Happy, 0.3), (Emotion::Sad, 0.3), (Emotion::Calm, 0.4)]);
        let result = calibrator.calibrate(&raw, Emotion::Happy).unwrap();
        assert_eq!(result.top.len(), 2);
        assert!((result.confidence - 0.5).abs() < 1e-12);
        assert!(Calibrator::new(CalibrationConfig {
            min_confidence: 1.0,
            top_k: 3
        })
        .is_err());
    }
}
