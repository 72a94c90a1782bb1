//! Session exports: results CSV, training-metrics CSV, full-session JSON and
//! the persisted configuration list.

use crate::error::MlError;
use crate::results::{
    ClassMetrics, ClassificationReport, ClusterData, ClusterPoint, ConfusionMatrix, ErrorSample,
    InspectionResult, PrCurve, RocCurve,
};
use crate::session::Session;
use crate::training::MetricsSeries;
use chrono::{DateTime, NaiveDate, Utc};
use geomaker_core::RunConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Shown in exports when no archive was uploaded.
pub const NO_ARCHIVE: &str = "N/A";
/// Shown in exports when the user never declared a domain.
pub const NO_DOMAIN_HINT: &str = "Not specified";

/// A human-readable configuration parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub parameter: String,
    pub value: String,
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes" } else { "No" }.to_string()
}

/// Labeled parameter list for `config`, reporting `effective_num_classes`.
pub fn config_entries(config: &RunConfig, effective_num_classes: usize) -> Vec<ConfigEntry> {
    let pairs = [
        ("Model", config.model_name.clone()),
        ("Full Fine-Tuning", yes_no(config.fine_tune)),
        ("Effective Number of Classes", effective_num_classes.to_string()),
        ("Epochs", config.epochs.to_string()),
        ("Learning Rate", config.learning_rate.to_string()),
        ("Batch Size", config.batch_size.to_string()),
        ("Train Split", config.train_split.to_string()),
        ("Validation Split", config.valid_split.to_string()),
        ("Validation Strategy", config.validation_strategy.clone()),
        ("L2 Regularization", config.l2_lambda.to_string()),
        ("Early Stopping Patience", config.patience.to_string()),
        ("Use Weighted Loss", yes_no(config.use_weighted_loss)),
        ("Show Uncertainty Score", yes_no(config.simulated_uncertainty)),
        ("Optimizer", config.optimizer.clone()),
        ("LR Scheduler", config.lr_scheduler.clone()),
        ("Data Augmentation", config.augmentation.clone()),
        ("XAI Method", config.explainability_method.clone()),
    ];
    pairs
        .into_iter()
        .map(|(parameter, value)| ConfigEntry {
            parameter: parameter.to_string(),
            value,
        })
        .collect()
}

/// Configuration persistence document: a JSON list of `{parameter, value}`.
pub fn config_json(session: &Session) -> Result<String, MlError> {
    let entries = config_entries(session.config(), session.effective_classes().count);
    Ok(serde_json::to_string_pretty(&entries)?)
}

/// Which export a default file name is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Config,
    ResultsCsv,
    TrainingMetricsCsv,
    AllResultsJson,
}

/// Default download name, e.g. `results_ResNet50_2026-03-01.csv`.
pub fn default_file_name(kind: ExportKind, model_name: &str, date: NaiveDate) -> String {
    let model: String = model_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let date = date.format("%Y-%m-%d");
    match kind {
        ExportKind::Config => format!("config_{}_run_{}.json", model, date),
        ExportKind::ResultsCsv => format!("results_{}_{}.csv", model, date),
        ExportKind::TrainingMetricsCsv => format!("training_metrics_{}_{}.csv", model, date),
        ExportKind::AllResultsJson => format!("all_results_{}_{}.json", model, date),
    }
}

/// Write `contents` to `dir/file_name` atomically (temp file + rename).
pub fn write_export(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, MlError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let tmp = dir.join(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, &path)?;
    info!(path = %path.display(), bytes = contents.len(), "Export written");
    Ok(path)
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new())
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String, MlError> {
    let data = writer
        .into_inner()
        .map_err(|e| MlError::export(format!("Failed to get CSV data: {}", e)))?;
    String::from_utf8(data).map_err(|e| MlError::export(format!("Invalid UTF-8 in CSV: {}", e)))
}

/// One row per epoch: `epoch,train_loss,valid_loss,train_acc,valid_acc`.
pub fn training_metrics_csv(metrics: &MetricsSeries) -> Result<String, MlError> {
    if metrics.is_empty() {
        return Err(MlError::results_unavailable("No training metrics recorded"));
    }
    let mut writer = csv_writer();
    writer.write_record(["epoch", "train_loss", "valid_loss", "train_acc", "valid_acc"])?;
    for m in metrics.all() {
        writer.write_record([
            m.epoch.to_string(),
            format!("{:.4}", m.train_loss),
            format!("{:.4}", m.valid_loss),
            format!("{:.4}", m.train_acc),
            format!("{:.4}", m.valid_acc),
        ])?;
    }
    writer.flush()?;
    finish_csv(writer)
}

fn metrics_record(label: &str, m: &ClassMetrics) -> [String; 6] {
    [
        label.to_string(),
        format!("{:.3}", m.precision),
        format!("{:.3}", m.recall),
        format!("{:.3}", m.specificity),
        format!("{:.3}", m.f1_score),
        m.support.to_string(),
    ]
}

/// Multi-section CSV of a completed run.
pub fn results_csv(session: &Session) -> Result<String, MlError> {
    let results = session
        .results()
        .ok_or_else(|| MlError::results_unavailable("No completed run to export"))?;
    let report = &results.classification_report;
    let mut w = csv_writer();

    w.write_record(["# Classification Report"])?;
    w.write_record(["Class", "Precision", "Recall", "Specificity", "F1-Score", "Support"])?;
    for row in &report.class_metrics {
        w.write_record(metrics_record(&row.class_name, &row.metrics))?;
    }
    w.write_record(metrics_record("Macro Avg", &report.macro_avg))?;
    w.write_record(metrics_record("Weighted Avg", &report.weighted_avg))?;
    w.write_record(["Overall Accuracy".to_string(), format!("{:.4}", report.accuracy)])?;
    if let Some(auc_pr) = report.auc_pr {
        w.write_record(["AUC-PR (Macro)".to_string(), format!("{:.3}", auc_pr)])?;
    }

    w.write_record(["# Confusion Matrix (Normalized)"])?;
    let cm = &results.confusion_matrix;
    let mut header = vec!["True\\Predicted".to_string()];
    header.extend(cm.labels.iter().cloned());
    w.write_record(&header)?;
    for (label, row) in cm.labels.iter().zip(&cm.matrix) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|v| format!("{:.2}", v)));
        w.write_record(&record)?;
    }

    w.write_record([format!("# ROC Curve ({}, AUC {:.3})", results.roc_curve.curve_type, results.roc_curve.auc)])?;
    w.write_record(["FPR", "TPR", "Threshold"])?;
    for p in &results.roc_curve.points {
        w.write_record([format!("{:.3}", p.fpr), format!("{:.3}", p.tpr), format!("{:.2}", p.threshold)])?;
    }

    w.write_record([format!("# Precision-Recall Curve ({}, AUC {:.3})", results.pr_curve.curve_type, results.pr_curve.auc)])?;
    w.write_record(["Recall", "Precision", "Threshold"])?;
    for p in &results.pr_curve.points {
        w.write_record([format!("{:.3}", p.recall), format!("{:.3}", p.precision), format!("{:.2}", p.threshold)])?;
    }

    w.write_record(["# Error Analysis"])?;
    w.write_record(["True Label", "Predicted Label", "Source File"])?;
    for e in &results.error_samples {
        w.write_record([
            e.true_label.as_str(),
            e.pred_label.as_str(),
            e.source_file_name.as_deref().unwrap_or(NO_ARCHIVE),
        ])?;
    }

    w.write_record(["# Clustering Metrics"])?;
    w.write_record(["Method", "ARI", "NMI"])?;
    let cm = &results.cluster_data.metrics;
    w.write_record(["Hierarchical".to_string(), format!("{:.3}", cm.hierarchical_ari), format!("{:.3}", cm.hierarchical_nmi)])?;
    w.write_record(["K-Means".to_string(), format!("{:.3}", cm.kmeans_ari), format!("{:.3}", cm.kmeans_nmi)])?;

    w.write_record(["# Individual Inspection"])?;
    match &results.individual_inspection {
        Some(i) => {
            w.write_record(["Image", "Predicted Class", "Confidence", "Uncertainty", "XAI Method"])?;
            w.write_record([
                i.image_name.clone(),
                i.predicted_class.clone(),
                format!("{:.4}", i.confidence),
                i.uncertainty_score
                    .map(|u| format!("{:.3}", u))
                    .unwrap_or_else(|| NO_ARCHIVE.to_string()),
                i.explainability_method.clone(),
            ])?;
        }
        None => w.write_record([crate::context::NOT_AVAILABLE])?,
    }

    w.flush()?;
    finish_csv(w)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedConfiguration {
    #[serde(flatten)]
    run: RunConfig,
    class_names: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetadata<'a> {
    exported_at: String,
    archive_file_name: &'a str,
    user_classification_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionExport<'a> {
    configuration: ExportedConfiguration,
    training_metrics: &'a MetricsSeries,
    evaluation_report: Option<&'a ClassificationReport>,
    confusion_matrix: Option<&'a ConfusionMatrix>,
    roc_curve_data: Option<&'a RocCurve>,
    pr_curve_data: Option<&'a PrCurve>,
    error_analysis_data: Option<&'a [ErrorSample]>,
    cluster_data: Option<&'a ClusterData>,
    augmented_embeddings_data: Option<&'a [ClusterPoint]>,
    individual_evaluation: Option<&'a InspectionResult>,
    metadata: ExportMetadata<'a>,
}

/// Full-session JSON snapshot. Missing results serialize as `null`; the
/// configuration is the one the results were produced with.
pub fn session_json(
    session: &Session,
    domain_hint: Option<&str>,
    exported_at: DateTime<Utc>,
) -> Result<String, MlError> {
    let (mut run, classes) = session.results_configuration();
    run.num_classes = classes.count;
    let results = session.results();

    let export = SessionExport {
        configuration: ExportedConfiguration {
            run,
            class_names: classes.names,
        },
        training_metrics: session.metrics(),
        evaluation_report: results.map(|r| &r.classification_report),
        confusion_matrix: results.map(|r| &r.confusion_matrix),
        roc_curve_data: results.map(|r| &r.roc_curve),
        pr_curve_data: results.map(|r| &r.pr_curve),
        error_analysis_data: results.map(|r| r.error_samples.as_slice()),
        cluster_data: results.map(|r| &r.cluster_data),
        augmented_embeddings_data: results.map(|r| r.augmented_embeddings.as_slice()),
        individual_evaluation: results.and_then(|r| r.individual_inspection.as_ref()),
        metadata: ExportMetadata {
            exported_at: exported_at.to_rfc3339(),
            archive_file_name: session.archive_file_name().unwrap_or(NO_ARCHIVE),
            user_classification_type: domain_hint.unwrap_or(NO_DOMAIN_HINT),
        },
    };
    Ok(serde_json::to_string_pretty(&export)?)
}
