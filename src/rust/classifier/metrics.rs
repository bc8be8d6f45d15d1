use std::fmt;

use serde::{Deserialize, Serialize};

use crate::emotion::Emotion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub emotion: Emotion,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Held-out evaluation of a training run. Ratios with a zero denominator are 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub total: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    /// `truth` and `predicted` are class indices into `classes`.
    pub fn compute(classes: &[Emotion], truth: &[usize], predicted: &[usize]) -> Self {
        let n = classes.len();
        let mut true_pos = vec![0usize; n];
        let mut pred_count = vec![0usize; n];
        let mut support = vec![0usize; n];
        let mut correct = 0;

        for (&t, &p) in truth.iter().zip(predicted) {
            if t < n {
                support[t] += 1;
            }
            if p < n {
                pred_count[p] += 1;
            }
            if t == p {
                correct += 1;
                if t < n {
                    true_pos[t] += 1;
                }
            }
        }

        let per_class: Vec<ClassMetrics> = classes
            .iter()
            .enumerate()
            .map(|(i, &emotion)| {
                let precision = ratio(true_pos[i], pred_count[i]);
                let recall = ratio(true_pos[i], support[i]);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    emotion,
                    precision,
                    recall,
                    f1,
                    support: support[i],
                }
            })
            .collect();

        let total = truth.len().min(predicted.len());
        let average = |weight: &dyn Fn(&ClassMetrics) -> f64| {
            let norm: f64 = per_class.iter().map(weight).sum();
            let mean = |field: fn(&ClassMetrics) -> f64| {
                if norm == 0.0 {
                    0.0
                } else {
                    per_class.iter().map(|m| field(m) * weight(m)).sum::<f64>() / norm
                }
            };
            AverageMetrics {
                precision: mean(|m| m.precision),
                recall: mean(|m| m.recall),
                f1: mean(|m| m.f1),
            }
        };
        let macro_avg = average(&|_| 1.0);
        let weighted_avg = average(&|m| m.support as f64);

        Self {
            accuracy: ratio(correct, total),
            per_class,
            macro_avg,
            weighted_avg,
            total,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                m.emotion.as_str(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_values() {
        let classes = [Emotion::Angry, Emotion::Happy, Emotion::Sad];
        let truth = [0, 0, 1, 1, 2, 2];
        let predicted = [0, 1, 1, 1, 2, 0];
        let report = ClassificationReport::compute(&classes, &truth, &predicted);

        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);
        let angry = &report.per_class[0];
        assert!((angry.precision - 0.5).abs() < 1e-12);
        assert!((angry.recall - 0.5).abs() < 1e-12);
        let happy = &report.per_class[1];
        assert!((happy.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((happy.recall - 1.0).abs() < 1e-12);
        assert!((happy.f1 - 0.8).abs() < 1e-12);
        assert_eq!(report.total, 6);
    }

    #[test]
    fn test_unpredicted_class_scores_zero() {
        let classes = [Emotion::Calm, Emotion::Fearful];
        let report = ClassificationReport::compute(&classes, &[0, 1], &[0, 0]);
        let fearful = &report.per_class[1];
        assert_eq!(fearful.precision, 0.0);
        assert_eq!(fearful.f1, 0.0);
        assert_eq!(fearful.support, 1);
        assert!(report.to_string().contains("fearful"));
    }
}
