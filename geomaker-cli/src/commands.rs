//! Subcommand handlers.

use crate::{Commands, ConfigAction, Overrides};
use chrono::Local;
use geomaker_core::AppConfig;
use geomaker_ml::export::{
    ExportKind, config_json, default_file_name, results_csv, session_json, training_metrics_csv,
    write_export,
};
use geomaker_ml::{AssistantConversation, RunStatus, Session, SessionController};
use std::path::{Path, PathBuf};

/// Load layered configuration and apply command-line overrides.
pub fn load_app_config(workspace: &Path, overrides: &Overrides) -> anyhow::Result<AppConfig> {
    let mut config = geomaker_core::load_config(Some(workspace), None)?;
    if let Some(provider) = &overrides.provider {
        config.llm.provider = provider.clone();
    }
    if overrides.seed.is_some() {
        config.synthesis.seed = overrides.seed;
    }
    for warning in config.validate() {
        tracing::warn!(warning = warning.as_str(), "Configuration warning");
    }
    Ok(config)
}

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, overrides),
        Commands::Run {
            archive,
            epochs,
            patience,
            tick_ms,
            export_dir,
        } => {
            let mut config = load_app_config(workspace, overrides)?;
            if let Some(epochs) = epochs {
                config.run.epochs = epochs;
            }
            if let Some(patience) = patience {
                config.run.patience = patience;
            }
            if let Some(tick_ms) = tick_ms {
                config.training.tick_interval_ms = tick_ms;
            }
            let controller = SessionController::new(&config);
            upload(&controller, &archive).await?;
            train(&controller).await?;

            let session = controller.snapshot().await;
            println!("{}", render_log(&session));
            println!("{}", render_summary(&session));
            if let Some(dir) = export_dir {
                for path in export_all(&session, &dir, None)? {
                    println!("Wrote {}", path.display());
                }
            }
            Ok(())
        }
        Commands::Inspect {
            archive,
            image,
            tick_ms,
        } => {
            let mut config = load_app_config(workspace, overrides)?;
            if let Some(tick_ms) = tick_ms {
                config.training.tick_interval_ms = tick_ms;
            }
            let controller = SessionController::new(&config);
            upload(&controller, &archive).await?;
            train(&controller).await?;

            let (name, bytes) = read_file(&image)?;
            let result = controller.inspect(&name, &bytes).await?;
            println!("Image: {}", result.image_name);
            println!("Predicted class: {}", result.predicted_class);
            println!("Confidence: {:.2}%", result.confidence * 100.0);
            if let Some(u) = result.uncertainty_score {
                println!("Uncertainty score: {:.3}", u);
            }
            println!("XAI method: {}", result.explainability_method);
            Ok(())
        }
        Commands::Context {
            archive,
            train: run_training,
            domain,
        } => {
            let config = load_app_config(workspace, overrides)?;
            let controller = SessionController::new(&config);
            if let Some(archive) = archive {
                upload(&controller, &archive).await?;
                if run_training {
                    train(&controller).await?;
                }
            }
            let context = controller.context(domain.as_deref()).await?;
            println!("{}", context.text);
            Ok(())
        }
        Commands::Chat {
            message,
            archive,
            train: run_training,
        } => {
            let config = load_app_config(workspace, overrides)?;
            let controller = SessionController::new(&config);
            if let Some(archive) = archive {
                upload(&controller, &archive).await?;
                if run_training {
                    train(&controller).await?;
                }
            }
            let mut assistant = AssistantConversation::new(config.llm.clone());
            let result = assistant.send(&controller, &message).await;
            for line in assistant.agent_log() {
                println!("{}", line);
            }
            let reply = result?;
            println!("{}", reply);
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".geomaker");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&AppConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            if !geomaker_core::config_exists(Some(workspace)) {
                println!("# No configuration file found; showing defaults.");
            }
            let config = load_app_config(workspace, overrides)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

pub fn read_file(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, bytes))
}

/// Upload `path` and print what was detected.
pub async fn upload(controller: &SessionController, path: &Path) -> anyhow::Result<()> {
    let (name, bytes) = read_file(path)?;
    match controller.upload(&name, &bytes).await {
        Ok(report) => {
            println!(
                "Loaded {}: {} classes ({}), {} images, {} samples",
                report.file_name,
                report.class_names.len(),
                report.class_names.join(", "),
                report.total_images,
                report.samples
            );
            for skipped in &report.skipped {
                println!("  skipped {}: {}", skipped.path, skipped.reason);
            }
            if let Some((from, to)) = report.num_classes_adjusted {
                println!("  number of classes adjusted from {} to {}", from, to);
            }
            Ok(())
        }
        Err(e) => {
            let detected = controller.read(|s| s.detected_classes().join(", ")).await;
            println!("Upload failed: {}", e);
            println!("Using placeholder classes: {}", detected);
            Err(e.into())
        }
    }
}

/// Start a run and wait for it to finish.
pub async fn train(controller: &SessionController) -> anyhow::Result<RunStatus> {
    let start = controller.start().await?;
    for warning in &start.warnings {
        println!("Warning: {}", warning);
    }
    println!(
        "Training run {} started with classes: {}",
        start.run_id,
        start.classes.names.join(", ")
    );
    Ok(controller.wait_for_completion().await?)
}

pub fn render_log(session: &Session) -> String {
    session.log().lines().join("\n")
}

/// Short human-readable overview of the session.
pub fn render_summary(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("Status: {}\n", session.status()));
    if let Some(progress) = session.progress() {
        out.push_str(&format!(
            "Epoch {}/{}: {}\n",
            progress.current_epoch, progress.total_epochs, progress.status_message
        ));
    }
    if let Some(last) = session.metrics().last() {
        out.push_str(&format!(
            "Last epoch: train loss {:.4}, valid loss {:.4}, train acc {:.4}, valid acc {:.4}\n",
            last.train_loss, last.valid_loss, last.train_acc, last.valid_acc
        ));
    }
    if let Some(best) = session.metrics().best() {
        out.push_str(&format!(
            "Best epoch: {} (valid loss {:.4})\n",
            best.epoch, best.valid_loss
        ));
    }
    match session.results() {
        Some(results) => {
            let report = &results.classification_report;
            out.push_str(&format!("Accuracy: {:.4}\n", report.accuracy));
            out.push_str(&format!("Macro F1: {:.4}\n", report.macro_avg.f1_score));
            out.push_str(&format!("ROC AUC: {:.3}, PR AUC: {:.3}\n", results.roc_curve.auc, results.pr_curve.auc));
            for row in &report.class_metrics {
                out.push_str(&format!(
                    "  {:<20} precision {:.3}  recall {:.3}  f1 {:.3}  support {}\n",
                    row.class_name,
                    row.metrics.precision,
                    row.metrics.recall,
                    row.metrics.f1_score,
                    row.metrics.support
                ));
            }
        }
        None => out.push_str("Results: not available\n"),
    }
    out
}

/// Write every available export into `dir` with default file names.
pub fn export_all(session: &Session, dir: &Path, domain_hint: Option<&str>) -> anyhow::Result<Vec<PathBuf>> {
    let today = Local::now().date_naive();
    let model = session.config().model_name.as_str();
    let mut written = Vec::new();

    written.push(write_export(
        dir,
        &default_file_name(ExportKind::Config, model, today),
        &config_json(session)?,
    )?);
    written.push(write_export(
        dir,
        &default_file_name(ExportKind::AllResultsJson, model, today),
        &session_json(session, domain_hint, chrono::Utc::now())?,
    )?);
    if !session.metrics().is_empty() {
        written.push(write_export(
            dir,
            &default_file_name(ExportKind::TrainingMetricsCsv, model, today),
            &training_metrics_csv(session.metrics())?,
        )?);
    }
    if session.results_available() {
        written.push(write_export(
            dir,
            &default_file_name(ExportKind::ResultsCsv, model, today),
            &results_csv(session)?,
        )?);
    }
    Ok(written)
}
