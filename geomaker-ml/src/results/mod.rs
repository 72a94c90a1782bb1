//! Result synthesis.
//!
//! Runs once when a training run terminates. Every artifact that carries
//! class labels is keyed on the same effective class list, in the same order.

pub mod clustering;
pub mod curves;
pub mod errors;
pub mod inspection;
pub mod report;

pub use clustering::{ClusterData, ClusterMetrics, ClusterPoint};
pub use curves::{PrCurve, PrPoint, RocCurve, RocPoint};
pub use errors::ErrorSample;
pub use inspection::InspectionResult;
pub use report::{ClassMetrics, ClassReportRow, ClassificationReport, ConfusionCounts, ConfusionMatrix};

use crate::classes::EffectiveClasses;
use crate::ingest::SampleImage;
use geomaker_core::SynthesisConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// All evaluation artifacts of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsBundle {
    pub class_names: Vec<String>,
    pub classification_report: ClassificationReport,
    pub confusion_counts: ConfusionCounts,
    pub confusion_matrix: ConfusionMatrix,
    pub roc_curve: RocCurve,
    pub pr_curve: PrCurve,
    pub cluster_data: ClusterData,
    pub augmented_embeddings: Vec<ClusterPoint>,
    pub error_samples: Vec<ErrorSample>,
    /// Filled later by an explicit image inspection.
    pub individual_inspection: Option<InspectionResult>,
}

/// Generate the full results bundle for `classes`.
pub fn synthesize<R: Rng + ?Sized>(
    classes: &EffectiveClasses,
    samples: &[SampleImage],
    settings: &SynthesisConfig,
    rng: &mut R,
) -> ResultsBundle {
    let names = &classes.names;
    let counts = ConfusionCounts::synthesize(names, rng);
    let mut report = ClassificationReport::from_counts(&counts);
    let roc_curve = curves::synthesize_roc(report.accuracy, settings.curve_points, rng);
    let pr_curve = curves::synthesize_pr(report.accuracy, settings.curve_points, rng);
    report.auc_pr = Some(pr_curve.auc);

    let cluster_data = clustering::synthesize_clusters(names, settings.cluster_points_per_class, rng);
    let augmented_embeddings =
        clustering::synthesize_augmented(names, settings.augmented_points, rng);
    let error_samples =
        errors::synthesize_error_samples(&counts, samples, settings.max_error_samples, rng);

    info!(
        classes = names.len(),
        accuracy = report.accuracy,
        errors = error_samples.len(),
        "Results synthesized"
    );
    ResultsBundle {
        class_names: names.clone(),
        confusion_matrix: counts.normalized(),
        confusion_counts: counts,
        classification_report: report,
        roc_curve,
        pr_curve,
        cluster_data,
        augmented_embeddings,
        error_samples,
        individual_inspection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn classes() -> EffectiveClasses {
        EffectiveClasses {
            count: 3,
            names: vec!["shale".into(), "granite".into(), "basalt".into()],
            from_archive: true,
        }
    }

    #[test]
    fn test_all_artifacts_share_class_order() {
        let mut rng = StdRng::seed_from_u64(21);
        let bundle = synthesize(&classes(), &[], &SynthesisConfig::default(), &mut rng);

        assert_eq!(bundle.class_names, classes().names);
        assert_eq!(bundle.classification_report.class_names(), vec!["shale", "granite", "basalt"]);
        assert_eq!(bundle.confusion_matrix.labels, bundle.class_names);
        assert_eq!(bundle.cluster_data.class_names, bundle.class_names);
        assert_eq!(bundle.augmented_embeddings.len(), 50);
        assert!(bundle.error_samples.len() <= 5);
        assert_eq!(bundle.classification_report.auc_pr, Some(bundle.pr_curve.auc));
        assert!(bundle.individual_inspection.is_none());
    }

    #[test]
    fn test_seeded_synthesis_is_reproducible() {
        let settings = SynthesisConfig::default();
        let a = synthesize(&classes(), &[], &settings, &mut StdRng::seed_from_u64(5));
        let b = synthesize(&classes(), &[], &settings, &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }
}
