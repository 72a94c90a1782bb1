//! Session context serialization.
//!
//! Projects the current session into a structured snapshot plus a plain-text
//! rendering that is handed to the collaborator as grounding. Every section
//! is always present; missing data renders as [`NOT_AVAILABLE`].

use crate::classes::resolve_effective_classes;
use crate::error::MlError;
use crate::ingest::{ArchiveManifest, SampleImage};
use crate::results::ResultsBundle;
use crate::training::MetricsSeries;
use geomaker_core::RunConfig;
use serde::Serialize;

/// Marker for any value or section the session does not have yet.
pub const NOT_AVAILABLE: &str = "not available";

/// Curve and projection points listed before eliding the rest.
const SAMPLE_POINTS: usize = 5;
const SAMPLE_CLUSTER_POINTS: usize = 3;

/// A snapshot section that is either filled or explicitly marked missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Section<T> {
    Available(T),
    NotAvailable(&'static str),
}

impl<T> Section<T> {
    fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Section::Available(v),
            None => Section::NotAvailable(NOT_AVAILABLE),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigurationSummary {
    pub model_name: String,
    pub fine_tune: bool,
    pub effective_num_classes: usize,
    pub effective_class_names: Vec<String>,
    pub epochs_configured: usize,
    pub actual_epochs_run: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub optimizer: String,
    pub xai_method: String,
    pub validation_strategy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub last_epoch: usize,
    pub last_train_loss: String,
    pub last_valid_loss: String,
    pub last_train_acc: String,
    pub last_valid_acc: String,
    pub best_epoch: usize,
    pub best_valid_loss: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallPerformance {
    pub accuracy: String,
    pub macro_avg_f1: String,
    pub weighted_avg_f1: String,
    pub auc_pr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteringSummary {
    #[serde(rename = "hierarchicalARI")]
    pub hierarchical_ari: String,
    #[serde(rename = "hierarchicalNMI")]
    pub hierarchical_nmi: String,
    #[serde(rename = "kmeansARI")]
    pub kmeans_ari: String,
    #[serde(rename = "kmeansNMI")]
    pub kmeans_nmi: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub archive_file_name: String,
    pub user_classification_type: String,
}

/// Structured projection of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub model_configuration: ModelConfigurationSummary,
    pub training_summary: Section<TrainingSummary>,
    pub overall_performance: Section<OverallPerformance>,
    pub clustering_metrics: Section<ClusteringSummary>,
    pub individual_inspection: Section<String>,
    pub user_context: UserContext,
}

/// Snapshot plus its text rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub snapshot: ContextSnapshot,
    pub text: String,
}

/// Everything the serializer reads.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub config: &'a RunConfig,
    pub manifest: Option<&'a ArchiveManifest>,
    pub samples: &'a [SampleImage],
    pub metrics: &'a MetricsSeries,
    pub results: Option<&'a ResultsBundle>,
    pub domain_hint: Option<&'a str>,
    pub default_num_classes: usize,
}

fn fixed(value: f64, places: usize) -> String {
    format!("{:.*}", places, value)
}

/// Build the snapshot and text for `input`. Identical input gives identical output.
pub fn serialize_context(input: &ContextInput<'_>) -> Result<SessionContext, MlError> {
    let snapshot = build_snapshot(input);
    let text = render_text(input, &snapshot)?;
    Ok(SessionContext { snapshot, text })
}

fn build_snapshot(input: &ContextInput<'_>) -> ContextSnapshot {
    let config = input.config;
    let classes = resolve_effective_classes(config, input.manifest, input.default_num_classes);
    let results = input.results;

    let training_summary = Section::from_option(input.metrics.last().map(|last| {
        let best = input.metrics.best().copied().unwrap_or(*last);
        TrainingSummary {
            last_epoch: last.epoch,
            last_train_loss: fixed(last.train_loss, 4),
            last_valid_loss: fixed(last.valid_loss, 4),
            last_train_acc: fixed(last.train_acc, 4),
            last_valid_acc: fixed(last.valid_acc, 4),
            best_epoch: best.epoch,
            best_valid_loss: fixed(best.valid_loss, 4),
        }
    }));

    let overall_performance = Section::from_option(results.map(|r| {
        let report = &r.classification_report;
        OverallPerformance {
            accuracy: fixed(report.accuracy, 4),
            macro_avg_f1: fixed(report.macro_avg.f1_score, 4),
            weighted_avg_f1: fixed(report.weighted_avg.f1_score, 4),
            auc_pr: report
                .auc_pr
                .map(|v| fixed(v, 4))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }));

    let clustering_metrics = Section::from_option(results.map(|r| {
        let m = &r.cluster_data.metrics;
        ClusteringSummary {
            hierarchical_ari: fixed(m.hierarchical_ari, 3),
            hierarchical_nmi: fixed(m.hierarchical_nmi, 3),
            kmeans_ari: fixed(m.kmeans_ari, 3),
            kmeans_nmi: fixed(m.kmeans_nmi, 3),
        }
    }));

    let individual_inspection = Section::from_option(
        results
            .and_then(|r| r.individual_inspection.as_ref())
            .map(|i| format!("{} ({:.2}%)", i.predicted_class, i.confidence * 100.0)),
    );

    ContextSnapshot {
        model_configuration: ModelConfigurationSummary {
            model_name: config.model_name.clone(),
            fine_tune: config.fine_tune,
            effective_num_classes: classes.count,
            effective_class_names: classes.names,
            epochs_configured: config.epochs,
            actual_epochs_run: input.metrics.len(),
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            optimizer: config.optimizer.clone(),
            xai_method: config.explainability_method.clone(),
            validation_strategy: config.validation_strategy.clone(),
        },
        training_summary,
        overall_performance,
        clustering_metrics,
        individual_inspection,
        user_context: UserContext {
            archive_file_name: input
                .manifest
                .map(|m| m.file_name.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            user_classification_type: input
                .domain_hint
                .unwrap_or(NOT_AVAILABLE)
                .to_string(),
        },
    }
}

fn section_header(out: &mut String, title: &str) {
    out.push_str(&format!("#### {}:\n", title));
}

fn not_available(out: &mut String) {
    out.push_str(NOT_AVAILABLE);
    out.push_str("\n\n");
}

fn elided(out: &mut String, total: usize, shown: usize) {
    if total > shown {
        out.push_str(&format!("...({} more points)\n", total - shown));
    }
}

fn render_text(input: &ContextInput<'_>, snapshot: &ContextSnapshot) -> Result<String, MlError> {
    let mut out = String::new();
    out.push_str("## Image Analysis Session Context ##\n\n");
    out.push_str("### Structured summary (JSON):\n");
    out.push_str("```json\n");
    out.push_str(&serde_json::to_string_pretty(snapshot)?);
    out.push_str("\n```\n\n");

    let model = &snapshot.model_configuration;
    let config = input.config;
    section_header(&mut out, "Model Configuration");
    out.push_str(&format!("- Base Model: {}\n", model.model_name));
    out.push_str(&format!(
        "- Full Fine-Tuning: {}\n",
        if model.fine_tune { "Yes" } else { "No" }
    ));
    out.push_str(&format!("- Effective Number of Classes: {}\n", model.effective_num_classes));
    out.push_str(&format!("- Class Names: {}\n", model.effective_class_names.join(", ")));
    out.push_str(&format!("- Epochs Configured: {}\n", model.epochs_configured));
    out.push_str(&format!("- Learning Rate: {}\n", model.learning_rate));
    out.push_str(&format!("- Batch Size: {}\n", model.batch_size));
    out.push_str(&format!("- Validation Strategy: {}\n", model.validation_strategy));
    out.push_str(&format!("- Optimizer: {}\n", model.optimizer));
    out.push_str(&format!("- Early Stopping Patience: {}\n", config.patience));
    out.push_str(&format!("- XAI Method: {}\n", model.xai_method));
    out.push_str(&format!(
        "- Archive: {}\n",
        snapshot.user_context.archive_file_name
    ));
    out.push_str(&format!(
        "User-declared classification type: {}\n\n",
        snapshot.user_context.user_classification_type
    ));

    render_metrics(&mut out, input.metrics);

    let Some(results) = input.results else {
        for title in [
            "Classification Report",
            "Confusion Matrix (Normalized)",
            "ROC Curve",
            "Precision-Recall Curve",
            "Error Analysis",
            "Clustering",
            "Augmented Embeddings",
            "Individual Image Inspection",
        ] {
            section_header(&mut out, title);
            not_available(&mut out);
        }
        out.push_str("## End of Session Context ##\n");
        return Ok(out);
    };

    render_report(&mut out, results);
    render_confusion(&mut out, results);
    render_curves(&mut out, results);
    render_errors(&mut out, results, input.samples);
    render_clusters(&mut out, results);
    render_inspection(&mut out, results);
    out.push_str("## End of Session Context ##\n");
    Ok(out)
}

fn render_metrics(out: &mut String, metrics: &MetricsSeries) {
    section_header(out, "Training Metrics (per epoch)");
    if metrics.is_empty() {
        not_available(out);
        return;
    }
    out.push_str("epoch,train_loss,valid_loss,train_acc,valid_acc\n");
    for m in metrics.all() {
        out.push_str(&format!(
            "{},{:.4},{:.4},{:.4},{:.4}\n",
            m.epoch, m.train_loss, m.valid_loss, m.train_acc, m.valid_acc
        ));
    }
    out.push('\n');
}

fn render_report(out: &mut String, results: &ResultsBundle) {
    let report = &results.classification_report;
    section_header(out, "Classification Report");
    out.push_str("Class,Precision,Recall,Specificity,F1_Score,Support\n");
    let rows = report
        .class_metrics
        .iter()
        .map(|r| (r.class_name.as_str(), &r.metrics))
        .chain([("Macro Avg", &report.macro_avg), ("Weighted Avg", &report.weighted_avg)]);
    for (label, m) in rows {
        out.push_str(&format!(
            "{},{:.3},{:.3},{:.3},{:.3},{}\n",
            label, m.precision, m.recall, m.specificity, m.f1_score, m.support
        ));
    }
    out.push_str(&format!("Overall Accuracy,{:.4}\n", report.accuracy));
    match report.auc_pr {
        Some(auc) => out.push_str(&format!("AUC-PR (Macro),{:.3}\n\n", auc)),
        None => out.push_str(&format!("AUC-PR (Macro),{}\n\n", NOT_AVAILABLE)),
    }
}

fn render_confusion(out: &mut String, results: &ResultsBundle) {
    let cm = &results.confusion_matrix;
    section_header(out, "Confusion Matrix (Normalized)");
    out.push_str(&format!("True\\Predicted,{}\n", cm.labels.join(",")));
    for (label, row) in cm.labels.iter().zip(&cm.matrix) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:.2}", v)).collect();
        out.push_str(&format!("{},{}\n", label, cells.join(",")));
    }
    out.push('\n');
}

fn render_curves(out: &mut String, results: &ResultsBundle) {
    let roc = &results.roc_curve;
    section_header(out, &format!("ROC Curve (AUC: {:.3})", roc.auc));
    out.push_str(&format!(
        "Curve type: {}, class: {}\n",
        roc.curve_type,
        roc.class_name.as_deref().unwrap_or(NOT_AVAILABLE)
    ));
    out.push_str("FPR,TPR,Threshold\n");
    for p in roc.points.iter().take(SAMPLE_POINTS) {
        out.push_str(&format!("{:.3},{:.3},{:.2}\n", p.fpr, p.tpr, p.threshold));
    }
    elided(out, roc.points.len(), SAMPLE_POINTS);
    out.push('\n');

    let pr = &results.pr_curve;
    section_header(out, &format!("Precision-Recall Curve (AUC: {:.3})", pr.auc));
    out.push_str(&format!(
        "Curve type: {}, class: {}\n",
        pr.curve_type,
        pr.class_name.as_deref().unwrap_or(NOT_AVAILABLE)
    ));
    out.push_str("Recall,Precision,Threshold\n");
    for p in pr.points.iter().take(SAMPLE_POINTS) {
        out.push_str(&format!("{:.3},{:.3},{:.2}\n", p.recall, p.precision, p.threshold));
    }
    elided(out, pr.points.len(), SAMPLE_POINTS);
    out.push('\n');
}

fn render_errors(out: &mut String, results: &ResultsBundle, samples: &[SampleImage]) {
    section_header(out, "Error Analysis");
    if results.error_samples.is_empty() {
        out.push_str("No misclassified samples.\n\n");
        return;
    }
    for (index, e) in results.error_samples.iter().enumerate() {
        let source = e
            .source_file_name
            .as_deref()
            .filter(|name| samples.iter().any(|s| s.original_file_name == *name))
            .map(|name| format!("(image from archive: {})", name))
            .unwrap_or_else(|| "(no archive image)".to_string());
        out.push_str(&format!(
            "- Error sample {}: true class: {}, predicted: {} {}\n",
            index + 1,
            e.true_label,
            e.pred_label,
            source
        ));
    }
    out.push('\n');
}

fn render_clusters(out: &mut String, results: &ResultsBundle) {
    let data = &results.cluster_data;
    section_header(out, "Clustering");
    out.push_str(&format!(
        "- Hierarchical: ARI={:.3}, NMI={:.3}\n",
        data.metrics.hierarchical_ari, data.metrics.hierarchical_nmi
    ));
    out.push_str(&format!(
        "- K-Means: ARI={:.3}, NMI={:.3}\n",
        data.metrics.kmeans_ari, data.metrics.kmeans_nmi
    ));
    out.push_str("Sample points (hierarchical):\n");
    for (idx, p) in data.hierarchical.iter().take(SAMPLE_CLUSTER_POINTS).enumerate() {
        out.push_str(&format!(
            "- Point {}: X={:.2}, Y={:.2}, cluster={}, true class={}\n",
            idx + 1,
            p.x,
            p.y,
            p.cluster,
            p.true_label
        ));
    }
    elided(out, data.hierarchical.len(), SAMPLE_CLUSTER_POINTS);
    out.push('\n');

    section_header(out, "Augmented Embeddings");
    if results.augmented_embeddings.is_empty() {
        not_available(out);
        return;
    }
    for (idx, p) in results
        .augmented_embeddings
        .iter()
        .take(SAMPLE_CLUSTER_POINTS)
        .enumerate()
    {
        out.push_str(&format!(
            "- Augmented point {}: X={:.2}, Y={:.2}, original class={}\n",
            idx + 1,
            p.x,
            p.y,
            p.true_label
        ));
    }
    elided(out, results.augmented_embeddings.len(), SAMPLE_CLUSTER_POINTS);
    out.push('\n');
}

fn render_inspection(out: &mut String, results: &ResultsBundle) {
    section_header(out, "Individual Image Inspection");
    let Some(i) = results.individual_inspection.as_ref() else {
        not_available(out);
        return;
    };
    out.push_str(&format!("- Image: {}\n", i.image_name));
    out.push_str(&format!("- Predicted Class: {}\n", i.predicted_class));
    out.push_str(&format!("- Confidence: {:.2}%\n", i.confidence * 100.0));
    match i.uncertainty_score {
        Some(u) => out.push_str(&format!("- Uncertainty Score: {:.3}\n", u)),
        None => out.push_str(&format!("- Uncertainty Score: {}\n", NOT_AVAILABLE)),
    }
    out.push_str(&format!("- XAI Method: {}\n\n", i.explainability_method));
}
