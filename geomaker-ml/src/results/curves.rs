//! Macro-averaged ROC and precision-recall curves.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MACRO_AVERAGE: &str = "macro-average";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrPoint {
    pub recall: f64,
    pub precision: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RocCurve {
    pub curve_type: String,
    /// Set only for per-class curves.
    pub class_name: Option<String>,
    /// Ordered by increasing false-positive rate.
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrCurve {
    pub curve_type: String,
    pub class_name: Option<String>,
    /// Ordered by increasing recall.
    pub points: Vec<PrPoint>,
    pub auc: f64,
}

/// Trapezoidal area under `(x, y)` points ordered by `x`.
pub fn trapezoid_auc(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
        .sum()
}

/// ROC curve `tpr = fpr^a` whose area tracks `accuracy`.
pub fn synthesize_roc<R: Rng + ?Sized>(accuracy: f64, points: usize, rng: &mut R) -> RocCurve {
    let target = (0.5 + accuracy / 2.0 + rng.gen_range(-0.03..0.03)).clamp(0.55, 0.99);
    let exponent = 1.0 / target - 1.0;
    let n = points.max(2);

    let points: Vec<RocPoint> = (0..n)
        .map(|i| {
            let fpr = i as f64 / (n - 1) as f64;
            RocPoint {
                fpr,
                tpr: fpr.powf(exponent),
                threshold: 1.0 - fpr,
            }
        })
        .collect();
    let xy: Vec<(f64, f64)> = points.iter().map(|p| (p.fpr, p.tpr)).collect();

    RocCurve {
        curve_type: MACRO_AVERAGE.to_string(),
        class_name: None,
        auc: trapezoid_auc(&xy),
        points,
    }
}

/// Precision-recall curve falling from 1.0 towards a floor below `accuracy`.
pub fn synthesize_pr<R: Rng + ?Sized>(accuracy: f64, points: usize, rng: &mut R) -> PrCurve {
    let floor = (accuracy - rng.gen_range(0.15..0.3)).clamp(0.05, 0.9);
    let shape = rng.gen_range(2.0..4.0);
    let n = points.max(2);

    let points: Vec<PrPoint> = (0..n)
        .map(|i| {
            let recall = i as f64 / (n - 1) as f64;
            PrPoint {
                recall,
                precision: 1.0 - (1.0 - floor) * recall.powf(shape),
                threshold: 1.0 - recall,
            }
        })
        .collect();
    let xy: Vec<(f64, f64)> = points.iter().map(|p| (p.recall, p.precision)).collect();

    PrCurve {
        curve_type: MACRO_AVERAGE.to_string(),
        class_name: None,
        auc: trapezoid_auc(&xy),
        points,
    }
}
