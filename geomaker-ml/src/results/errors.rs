//! Misclassified-sample picks for error analysis.

use super::report::ConfusionCounts;
use crate::ingest::SampleImage;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One misclassified item. `pred_label` always differs from `true_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSample {
    pub true_label: String,
    pub pred_label: String,
    /// Data URL of an ingested sample of the true class, when one exists.
    pub image: Option<String>,
    pub source_file_name: Option<String>,
}

/// Draw up to `max` misclassifications from the off-diagonal cells of `counts`.
///
/// Each pick is illustrated with an ingested sample image of its true class,
/// cycling through that class's samples.
pub fn synthesize_error_samples<R: Rng + ?Sized>(
    counts: &ConfusionCounts,
    samples: &[SampleImage],
    max: usize,
    rng: &mut R,
) -> Vec<ErrorSample> {
    let mut pool: Vec<(usize, usize)> = Vec::new();
    for (i, row) in counts.counts.iter().enumerate() {
        for (j, &c) in row.iter().enumerate() {
            if i != j {
                pool.extend(std::iter::repeat_n((i, j), c));
            }
        }
    }
    pool.shuffle(rng);

    let mut used: HashMap<&str, usize> = HashMap::new();
    pool.into_iter()
        .take(max)
        .map(|(i, j)| {
            let true_label = counts.labels[i].as_str();
            let matching: Vec<&SampleImage> = samples
                .iter()
                .filter(|s| s.class_name == true_label)
                .collect();
            let sample = if matching.is_empty() {
                None
            } else {
                let n = used.entry(true_label).or_insert(0);
                let pick = matching[*n % matching.len()];
                *n += 1;
                Some(pick)
            };
            ErrorSample {
                true_label: true_label.to_string(),
                pred_label: counts.labels[j].clone(),
                image: sample.map(|s| s.image_data.clone()),
                source_file_name: sample.map(|s| s.original_file_name.clone()),
            }
        })
        .collect()
}
