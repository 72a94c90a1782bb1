//! End-to-end session tests: upload, timed runs through the controller,
//! result consistency, exports and the assistant conversation.

use geomaker_core::{AppConfig, ChatRole, LlmConfig, LlmError, MockBackend};
use geomaker_ml::export::{results_csv, session_json, training_metrics_csv};
mod common;

use common::ScriptedMetrics;
use geomaker_ml::{AssistantConversation, MlError, RunStatus, SessionController};
use pretty_assertions::assert_eq;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn pets_zip() -> Vec<u8> {
    zip_of(&[
        ("cats/a.jpg", b"jpeg-a"),
        ("cats/b.png", b"png-b"),
        ("dogs/c.jpg", b"jpeg-c"),
        ("__MACOSX/cats/._a.jpg", b"meta"),
    ])
}

fn app(epochs: usize, patience: usize) -> AppConfig {
    let mut app = AppConfig::default();
    app.run.epochs = epochs;
    app.run.patience = patience;
    app.synthesis.seed = Some(42);
    app.training.tick_interval_ms = 700;
    app
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_completes_at_final_epoch() {
    let controller = SessionController::new(&app(5, 2));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();

    let source = ScriptedMetrics::new(vec![1.0, 0.9, 0.8, 0.85, 0.9]);
    controller.start_with_source(Box::new(source)).await.unwrap();
    let status = controller.wait_for_completion().await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    let session = controller.snapshot().await;
    let epochs: Vec<usize> = session.metrics().all().iter().map(|m| m.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3, 4, 5]);
    assert!(session.results_available());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_stops_early() {
    let controller = SessionController::new(&app(20, 2));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();

    let source = ScriptedMetrics::new(vec![1.0, 1.2, 1.1]);
    controller.start_with_source(Box::new(source)).await.unwrap();
    let status = controller.wait_for_completion().await.unwrap();

    assert_eq!(status, RunStatus::EarlyStopped);
    let session = controller.snapshot().await;
    assert_eq!(session.metrics().len(), 3);
    assert_eq!(session.progress().unwrap().current_epoch, 3);
    assert!(
        session
            .log()
            .lines()
            .iter()
            .any(|l| l.contains("stopped early at epoch 3"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_without_archive_is_rejected() {
    let controller = SessionController::new(&app(5, 2));
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MlError::InvalidConfiguration(_)));
    assert_eq!(controller.status().await, RunStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_partial_metrics() {
    let controller = SessionController::new(&app(10, 5));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();
    controller
        .start_with_source(Box::new(ScriptedMetrics::improving_then_flat(10)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1450)).await;
    assert!(controller.cancel().await);

    let session = controller.snapshot().await;
    assert_eq!(session.status(), RunStatus::Idle);
    assert_eq!(session.metrics().len(), 2);
    assert!(!session.results_available());

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(controller.snapshot().await.metrics().len(), 2);
    assert!(!controller.cancel().await);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_discards_first_run_metrics() {
    let controller = SessionController::new(&app(4, 4));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();

    let first = controller
        .start_with_source(Box::new(ScriptedMetrics::new(vec![9.0; 4])))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(750)).await;
    assert_eq!(controller.snapshot().await.metrics().len(), 1);

    let second = controller
        .start_with_source(Box::new(ScriptedMetrics::new(vec![1.0, 0.9, 0.8, 0.7])))
        .await
        .unwrap();
    assert!(second.run_id > first.run_id);
    assert_eq!(controller.wait_for_completion().await.unwrap(), RunStatus::Completed);

    let session = controller.snapshot().await;
    assert_eq!(session.metrics().len(), 4);
    assert!(session.metrics().all().iter().all(|m| m.valid_loss < 9.0));
    assert_eq!(
        session.log().lines().first().map(String::as_str),
        Some("INFO: Starting model training process...")
    );
}

#[tokio::test(start_paused = true)]
async fn test_upload_during_run_stops_it() {
    let controller = SessionController::new(&app(10, 10));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();
    controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(750)).await;

    controller.upload("pets.zip", &pets_zip()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3000)).await;

    let session = controller.snapshot().await;
    assert_eq!(session.status(), RunStatus::Idle);
    assert!(session.metrics().is_empty());
    assert!(session.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_class_lists_agree_across_artifacts() {
    let controller = SessionController::new(&app(3, 3));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();
    controller.start().await.unwrap();
    controller.wait_for_completion().await.unwrap();

    let session = controller.snapshot().await;
    let results = session.results().unwrap();
    let expected = vec!["cats".to_string(), "dogs".to_string()];
    assert_eq!(results.class_names, expected);
    assert_eq!(results.classification_report.class_names(), vec!["cats", "dogs"]);
    assert_eq!(results.confusion_matrix.labels, expected);
    assert_eq!(results.cluster_data.class_names, expected);
    for point in results.cluster_data.hierarchical.iter().chain(&results.augmented_embeddings) {
        assert!(expected.contains(&point.true_label));
    }
    for error in &results.error_samples {
        assert!(expected.contains(&error.true_label));
        assert!(expected.contains(&error.pred_label));
        assert_ne!(error.true_label, error.pred_label);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exports_after_run() {
    let controller = SessionController::new(&app(3, 3));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();

    let before = controller.snapshot().await;
    assert!(matches!(results_csv(&before), Err(MlError::ResultsUnavailable(_))));
    let json: serde_json::Value =
        serde_json::from_str(&session_json(&before, None, chrono::Utc::now()).unwrap()).unwrap();
    assert!(json["evaluationReport"].is_null());
    assert_eq!(json["metadata"]["userClassificationType"], "Not specified");

    controller.start().await.unwrap();
    controller.wait_for_completion().await.unwrap();
    let session = controller.snapshot().await;

    let csv = results_csv(&session).unwrap();
    assert!(csv.starts_with("# Classification Report\n"));
    assert!(csv.contains("\ncats,"));
    assert!(csv.contains("# Confusion Matrix (Normalized)"));

    let metrics = training_metrics_csv(session.metrics()).unwrap();
    assert_eq!(metrics.lines().count(), 4);

    let json: serde_json::Value = serde_json::from_str(
        &session_json(&session, Some("Pet Photos"), chrono::Utc::now()).unwrap(),
    )
    .unwrap();
    assert_eq!(json["metadata"]["archiveFileName"], "pets.zip");
    assert_eq!(json["metadata"]["userClassificationType"], "Pet Photos");
    assert_eq!(json["configuration"]["classNames"], serde_json::json!(["cats", "dogs"]));
    assert_eq!(json["trainingMetrics"].as_array().unwrap().len(), 3);
    assert!(json["evaluationReport"].is_object());
}

#[tokio::test(start_paused = true)]
async fn test_session_json_labels_results_with_run_classes() {
    let controller = SessionController::new(&app(3, 3));
    controller.upload("pets.zip", &pets_zip()).await.unwrap();
    controller.start().await.unwrap();
    controller.wait_for_completion().await.unwrap();

    let mut changed = controller.read(|s| s.config().clone()).await;
    changed.fine_tune = false;
    changed.num_classes = 4;
    controller.update_config(changed).await;

    let session = controller.snapshot().await;
    assert_eq!(session.effective_classes().count, 4);
    let json: serde_json::Value =
        serde_json::from_str(&session_json(&session, None, chrono::Utc::now()).unwrap()).unwrap();
    assert_eq!(json["configuration"]["classNames"], serde_json::json!(["cats", "dogs"]));
    assert_eq!(json["configuration"]["num_classes"], 2);
    assert_eq!(json["configuration"]["classNames"], json["confusionMatrix"]["labels"]);
}

#[tokio::test(start_paused = true)]
async fn test_assistant_declares_domain_and_simulates_research() {
    let controller = SessionController::new(&app(3, 3));
    controller.upload("rocks.zip", &pets_zip()).await.unwrap();

    let backend = Arc::new(MockBackend::new());
    let mut assistant = AssistantConversation::with_backend(LlmConfig::default(), backend.clone());

    assistant
        .send(&controller, "My dataset is about rock thin sections.")
        .await
        .unwrap();
    assert_eq!(assistant.domain_hint(), Some("Rock Thin Sections"));
    assert!(assistant.agent_log().is_empty());

    let reply = assistant
        .send(&controller, "Show me recent papers on this topic")
        .await
        .unwrap();
    assert_eq!(reply, "Echo: Show me recent papers on this topic");
    assert_eq!(assistant.agent_log().len(), 4);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].system_instruction.contains("Rock Thin Sections"));
    assert_eq!(requests[1].turns.len(), 3);

    let roles: Vec<ChatRole> = assistant.transcript().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![ChatRole::User, ChatRole::Model, ChatRole::Model, ChatRole::User, ChatRole::Model]
    );
}

#[tokio::test(start_paused = true)]
async fn test_assistant_failure_is_recorded() {
    let controller = SessionController::new(&app(3, 3));
    let backend = Arc::new(MockBackend::new());
    backend.queue_error(LlmError::AuthFailed {
        provider: "mock".into(),
    });
    let mut assistant = AssistantConversation::with_backend(LlmConfig::default(), backend);

    let err = assistant.send(&controller, "hello").await.unwrap_err();
    assert!(matches!(err, MlError::Llm(LlmError::AuthFailed { .. })));
    let last = assistant.transcript().last().unwrap();
    assert_eq!(last.role, ChatRole::Model);
    assert!(last.text.starts_with("Sorry"));
    assert!(assistant.is_open());
}
