//! Classification report and confusion matrix.
//!
//! Everything is derived from one synthesized count matrix so per-class
//! rows, averages, accuracy and the normalized matrix agree with each other.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-class (or averaged) classification metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub specificity: f64,
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReportRow {
    pub class_name: String,
    #[serde(flatten)]
    pub metrics: ClassMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationReport {
    /// One row per class, in effective class order.
    pub class_metrics: Vec<ClassReportRow>,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub accuracy: f64,
    /// Area under the macro-averaged precision-recall curve.
    pub auc_pr: Option<f64>,
}

impl ClassificationReport {
    /// Compute the report from raw counts.
    pub fn from_counts(counts: &ConfusionCounts) -> Self {
        let k = counts.labels.len();
        let total = counts.total();
        let rows: Vec<ClassReportRow> = (0..k)
            .map(|i| ClassReportRow {
                class_name: counts.labels[i].clone(),
                metrics: class_metrics(counts, i, total),
            })
            .collect();

        let macro_avg = average(&rows, total, |_| 1.0 / k.max(1) as f64);
        let weighted_avg = average(&rows, total, |m| {
            if total == 0 {
                0.0
            } else {
                m.support as f64 / total as f64
            }
        });
        let correct: usize = (0..k).map(|i| counts.counts[i][i]).sum();

        Self {
            class_metrics: rows,
            macro_avg,
            weighted_avg,
            accuracy: ratio(correct, total),
            auc_pr: None,
        }
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.class_metrics
            .iter()
            .map(|r| r.class_name.as_str())
            .collect()
    }

    pub fn row(&self, class_name: &str) -> Option<&ClassMetrics> {
        self.class_metrics
            .iter()
            .find(|r| r.class_name == class_name)
            .map(|r| &r.metrics)
    }
}

fn class_metrics(counts: &ConfusionCounts, i: usize, total: usize) -> ClassMetrics {
    let tp = counts.counts[i][i];
    let support: usize = counts.counts[i].iter().sum();
    let predicted: usize = counts.counts.iter().map(|row| row[i]).sum();
    let fp = predicted - tp;
    let fn_ = support - tp;
    let tn = total - tp - fp - fn_;

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        specificity: ratio(tn, tn + fp),
        f1_score,
        support,
    }
}

fn average(rows: &[ClassReportRow], total: usize, weight: impl Fn(&ClassMetrics) -> f64) -> ClassMetrics {
    let mut avg = ClassMetrics {
        precision: 0.0,
        recall: 0.0,
        specificity: 0.0,
        f1_score: 0.0,
        support: total,
    };
    for row in rows {
        let w = weight(&row.metrics);
        avg.precision += w * row.metrics.precision;
        avg.recall += w * row.metrics.recall;
        avg.specificity += w * row.metrics.specificity;
        avg.f1_score += w * row.metrics.f1_score;
    }
    avg
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Square count matrix: rows are true classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionCounts {
    /// A diagonal-dominant matrix with 20..=60 samples per class.
    pub fn synthesize<R: Rng + ?Sized>(labels: &[String], rng: &mut R) -> Self {
        let k = labels.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (i, row) in counts.iter_mut().enumerate() {
            let support: usize = rng.gen_range(20..=60);
            let correct = if k > 1 {
                (support as f64 * rng.gen_range(0.6..0.95)).round() as usize
            } else {
                support
            };
            row[i] = correct;
            for _ in correct..support {
                let mut j = rng.gen_range(0..k - 1);
                if j >= i {
                    j += 1;
                }
                row[j] += 1;
            }
        }
        Self {
            labels: labels.to_vec(),
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Row-normalized matrix (each row sums to 1 unless the class has no samples).
    pub fn normalized(&self) -> ConfusionMatrix {
        let matrix = self
            .counts
            .iter()
            .map(|row| {
                let sum: usize = row.iter().sum();
                row.iter().map(|&c| ratio(c, sum)).collect()
            })
            .collect();
        ConfusionMatrix {
            labels: self.labels.clone(),
            matrix,
        }
    }
}

/// Row-normalized confusion matrix labeled on both axes by the class list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}
