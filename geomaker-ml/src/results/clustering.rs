//! 2-D cluster projections and agreement metrics (ARI, NMI).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Probability that a hierarchical assignment matches the true class.
const HIERARCHICAL_PURITY: f64 = 0.85;
/// Probability that a k-means assignment matches the true class.
const KMEANS_PURITY: f64 = 0.78;
const CENTROID_RADIUS: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoint {
    pub x: f64,
    pub y: f64,
    pub cluster: usize,
    pub true_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    #[serde(rename = "hierarchicalARI")]
    pub hierarchical_ari: f64,
    #[serde(rename = "hierarchicalNMI")]
    pub hierarchical_nmi: f64,
    #[serde(rename = "kmeansARI")]
    pub kmeans_ari: f64,
    #[serde(rename = "kmeansNMI")]
    pub kmeans_nmi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterData {
    pub class_names: Vec<String>,
    pub hierarchical: Vec<ClusterPoint>,
    pub kmeans: Vec<ClusterPoint>,
    pub metrics: ClusterMetrics,
}

/// Project `points_per_class` samples of every class around its centroid and
/// assign them to clusters with two simulated methods.
pub fn synthesize_clusters<R: Rng + ?Sized>(
    class_names: &[String],
    points_per_class: usize,
    rng: &mut R,
) -> ClusterData {
    let k = class_names.len();
    let mut coords = Vec::with_capacity(k * points_per_class);
    for class in 0..k {
        let (cx, cy) = centroid(class, k);
        for _ in 0..points_per_class {
            coords.push((class, cx + gaussian(rng), cy + gaussian(rng)));
        }
    }

    let truth: Vec<usize> = coords.iter().map(|&(class, _, _)| class).collect();
    let hierarchical_ids = assign(&truth, k, HIERARCHICAL_PURITY, rng);
    let kmeans_ids = assign(&truth, k, KMEANS_PURITY, rng);

    let to_points = |ids: &[usize]| -> Vec<ClusterPoint> {
        coords
            .iter()
            .zip(ids)
            .map(|(&(class, x, y), &cluster)| ClusterPoint {
                x,
                y,
                cluster,
                true_label: class_names[class].clone(),
            })
            .collect()
    };

    ClusterData {
        class_names: class_names.to_vec(),
        hierarchical: to_points(&hierarchical_ids),
        kmeans: to_points(&kmeans_ids),
        metrics: ClusterMetrics {
            hierarchical_ari: adjusted_rand_index(&truth, &hierarchical_ids),
            hierarchical_nmi: normalized_mutual_info(&truth, &hierarchical_ids),
            kmeans_ari: adjusted_rand_index(&truth, &kmeans_ids),
            kmeans_nmi: normalized_mutual_info(&truth, &kmeans_ids),
        },
    }
}

/// Embedding points of `count` augmented samples, cycling through the classes.
pub fn synthesize_augmented<R: Rng + ?Sized>(
    class_names: &[String],
    count: usize,
    rng: &mut R,
) -> Vec<ClusterPoint> {
    let k = class_names.len();
    if k == 0 {
        return Vec::new();
    }
    (0..count)
        .map(|i| {
            let class = i % k;
            let (cx, cy) = centroid(class, k);
            ClusterPoint {
                x: cx + 1.6 * gaussian(rng),
                y: cy + 1.6 * gaussian(rng),
                cluster: class,
                true_label: class_names[class].clone(),
            }
        })
        .collect()
}

fn centroid(class: usize, k: usize) -> (f64, f64) {
    if k <= 1 {
        return (0.0, 0.0);
    }
    let angle = 2.0 * PI * class as f64 / k as f64;
    (CENTROID_RADIUS * angle.cos(), CENTROID_RADIUS * angle.sin())
}

/// Standard normal sample (Box-Muller).
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn assign<R: Rng + ?Sized>(truth: &[usize], k: usize, purity: f64, rng: &mut R) -> Vec<usize> {
    truth
        .iter()
        .map(|&class| {
            if k < 2 || rng.gen_bool(purity) {
                class
            } else {
                let mut other = rng.gen_range(0..k - 1);
                if other >= class {
                    other += 1;
                }
                other
            }
        })
        .collect()
}

fn contingency(a: &[usize], b: &[usize]) -> Vec<Vec<usize>> {
    let rows = a.iter().max().map_or(0, |m| m + 1);
    let cols = b.iter().max().map_or(0, |m| m + 1);
    let mut table = vec![vec![0usize; cols]; rows];
    for (&i, &j) in a.iter().zip(b) {
        table[i][j] += 1;
    }
    table
}

fn comb2(n: usize) -> f64 {
    let n = n as f64;
    n * (n - 1.0) / 2.0
}

/// Adjusted Rand index between two labelings of the same items.
///
/// Returns 1.0 when both labelings are trivial (chance-corrected index undefined).
pub fn adjusted_rand_index(truth: &[usize], pred: &[usize]) -> f64 {
    let n = truth.len().min(pred.len());
    if n < 2 {
        return 1.0;
    }
    let table = contingency(&truth[..n], &pred[..n]);
    let index: f64 = table.iter().flatten().map(|&c| comb2(c)).sum();
    let sum_rows: f64 = table.iter().map(|r| comb2(r.iter().sum())).sum();
    let cols = table.first().map_or(0, |r| r.len());
    let sum_cols: f64 = (0..cols)
        .map(|j| comb2(table.iter().map(|r| r[j]).sum()))
        .sum();

    let expected = sum_rows * sum_cols / comb2(n);
    let max_index = (sum_rows + sum_cols) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < f64::EPSILON {
        return 1.0;
    }
    (index - expected) / denom
}

/// Normalized mutual information (arithmetic-mean normalization), in `[0, 1]`.
pub fn normalized_mutual_info(truth: &[usize], pred: &[usize]) -> f64 {
    let n = truth.len().min(pred.len());
    if n == 0 {
        return 1.0;
    }
    let table = contingency(&truth[..n], &pred[..n]);
    let total = n as f64;
    let row_sums: Vec<f64> = table.iter().map(|r| r.iter().sum::<usize>() as f64).collect();
    let cols = table.first().map_or(0, |r| r.len());
    let col_sums: Vec<f64> = (0..cols)
        .map(|j| table.iter().map(|r| r[j]).sum::<usize>() as f64)
        .collect();

    let mut mutual = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &c) in row.iter().enumerate() {
            if c > 0 {
                let c = c as f64;
                mutual += c / total * (total * c / (row_sums[i] * col_sums[j])).ln();
            }
        }
    }
    let entropy = |sums: &[f64]| -> f64 {
        sums.iter()
            .filter(|&&s| s > 0.0)
            .map(|&s| -(s / total) * (s / total).ln())
            .sum()
    };
    let norm = (entropy(&row_sums) + entropy(&col_sums)) / 2.0;
    if norm <= f64::EPSILON {
        return 1.0;
    }
    (mutual / norm).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{}", i)).collect()
    }

    #[test]
    fn test_identical_labelings_score_one() {
        let labels = [0, 0, 1, 1, 2, 2];
        assert!((adjusted_rand_index(&labels, &labels) - 1.0).abs() < 1e-12);
        assert!((normalized_mutual_info(&labels, &labels) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_permuted_cluster_ids_still_agree() {
        let truth = [0, 0, 1, 1, 2, 2];
        let pred = [2, 2, 0, 0, 1, 1];
        assert!((adjusted_rand_index(&truth, &pred) - 1.0).abs() < 1e-12);
        assert!((normalized_mutual_info(&truth, &pred) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_ari_value() {
        // sklearn.metrics.adjusted_rand_score([0, 0, 1, 1], [0, 0, 1, 2]) == 0.5714...
        let ari = adjusted_rand_index(&[0, 0, 1, 1], &[0, 0, 1, 2]);
        assert!((ari - 4.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_independent_labeling_has_no_information() {
        let truth = [0, 0, 1, 1];
        let pred = [0, 1, 0, 1];
        assert!(normalized_mutual_info(&truth, &pred).abs() < 1e-12);
        assert!(adjusted_rand_index(&truth, &pred) < 0.0);
    }

    #[test]
    fn test_cluster_data_uses_class_names_in_order() {
        let mut rng = StdRng::seed_from_u64(11);
        let data = synthesize_clusters(&names(3), 15, &mut rng);
        assert_eq!(data.class_names, names(3));
        assert_eq!(data.hierarchical.len(), 45);
        assert_eq!(data.kmeans.len(), 45);
        assert_eq!(data.hierarchical[0].true_label, "c0");
        assert_eq!(data.hierarchical[44].true_label, "c2");
        assert!(data.hierarchical.iter().all(|p| p.cluster < 3));
        assert!(data.metrics.hierarchical_ari > 0.0 && data.metrics.hierarchical_ari <= 1.0);
        assert!(data.metrics.kmeans_nmi > 0.0 && data.metrics.kmeans_nmi <= 1.0);
    }

    #[test]
    fn test_single_class_clusters_are_trivially_perfect() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = synthesize_clusters(&names(1), 5, &mut rng);
        assert_eq!(data.metrics.kmeans_ari, 1.0);
        assert_eq!(data.metrics.hierarchical_nmi, 1.0);
    }

    #[test]
    fn test_augmented_points_cycle_classes() {
        let mut rng = StdRng::seed_from_u64(5);
        let points = synthesize_augmented(&names(3), 50, &mut rng);
        assert_eq!(points.len(), 50);
        assert_eq!(points[4].true_label, "c1");
        assert!(synthesize_augmented(&[], 50, &mut rng).is_empty());
    }
}
