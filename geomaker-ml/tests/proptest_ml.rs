//! Property-based tests for ingestion bounds and the training state machine.

mod common;

use common::ScriptedMetrics;
use proptest::prelude::*;

use geomaker_core::{IngestConfig, RunConfig};
use geomaker_ml::classes::EffectiveClasses;
use geomaker_ml::ingest_archive;
use geomaker_ml::training::simulation::loss_baseline;
use geomaker_ml::training::{
    MetricSource, RunStatus, SimulatedMetrics, TickOutcome, TrainingScheduler,
};
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn build_zip(images_per_class: &[usize]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (class, count) in images_per_class.iter().enumerate() {
        for image in 0..*count {
            writer
                .start_file(format!("class{}/img{}.jpg", class, image), options)
                .unwrap();
            writer.write_all(b"pixels").unwrap();
        }
        writer
            .start_file(format!("class{}/notes.txt", class), options)
            .unwrap();
        writer.write_all(b"not an image").unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn classes() -> EffectiveClasses {
    EffectiveClasses {
        count: 2,
        names: vec!["a".into(), "b".into()],
        from_archive: false,
    }
}

/// Terminal epoch and status predicted directly from the termination rule.
fn expected_outcome(losses: &[f64], epochs: usize, patience: usize) -> (usize, RunStatus) {
    let mut best: Option<f64> = None;
    let mut streak = 0;
    let mut epoch = 0;
    loop {
        epoch += 1;
        let loss = losses
            .get(epoch - 1)
            .or(losses.last())
            .copied()
            .unwrap_or(1.0);
        match best {
            Some(b) if loss >= b => streak += 1,
            _ => {
                best = Some(loss);
                streak = 0;
            }
        }
        if epoch >= epochs {
            return (epoch, RunStatus::Completed);
        }
        if streak >= patience {
            return (epoch, RunStatus::EarlyStopped);
        }
    }
}

// --- Ingestion properties ---

proptest! {
    #[test]
    fn ingestion_respects_class_order_and_sample_bounds(
        images_per_class in prop::collection::vec(1usize..8, 1..6),
        per_class in 1usize..4,
        total in 1usize..12,
    ) {
        let bytes = build_zip(&images_per_class);
        let limits = IngestConfig {
            max_samples_per_class: per_class,
            max_total_samples: total,
            default_num_classes: 3,
        };
        let ingested = ingest_archive("data.zip", &bytes, &limits).unwrap();

        let expected: Vec<String> = (0..images_per_class.len()).map(|i| format!("class{}", i)).collect();
        prop_assert_eq!(ingested.manifest.class_names(), expected.clone());
        prop_assert_eq!(ingested.manifest.num_classes(), images_per_class.len());
        prop_assert_eq!(ingested.manifest.total_images(), images_per_class.iter().sum::<usize>());

        prop_assert!(ingested.samples.len() <= total);
        for (class, count) in expected.iter().zip(&images_per_class) {
            let names: Vec<&str> = ingested
                .samples
                .iter()
                .filter(|s| &s.class_name == class)
                .map(|s| s.original_file_name.as_str())
                .collect();
            prop_assert!(names.len() <= per_class.min(*count));
            let in_order: Vec<String> = (0..names.len()).map(|i| format!("img{}.jpg", i)).collect();
            prop_assert_eq!(names, in_order.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}

// --- Scheduler properties ---

proptest! {
    #[test]
    fn scheduler_terminates_by_rule(
        losses in prop::collection::vec(0.1f64..2.0, 1..15),
        epochs in 1usize..15,
        patience in 1usize..5,
    ) {
        let config = RunConfig { epochs, patience, ..RunConfig::default() };
        let mut scheduler = TrainingScheduler::new();
        let run_id = scheduler.begin(config, classes());
        let mut source = ScriptedMetrics::new(losses.clone());

        let mut finished = None;
        for _ in 0..epochs {
            if let TickOutcome::Finished { status, metrics } = scheduler.tick(run_id, &mut source) {
                finished = Some((metrics.epoch, status));
                break;
            }
        }

        prop_assert_eq!(finished, Some(expected_outcome(&losses, epochs, patience)));
        let recorded: Vec<usize> = scheduler.metrics().all().iter().map(|m| m.epoch).collect();
        let (last, _) = expected_outcome(&losses, epochs, patience);
        prop_assert_eq!(recorded, (1..=last).collect::<Vec<_>>());
        prop_assert_eq!(scheduler.tick(run_id, &mut source), TickOutcome::Stale);
    }

    #[test]
    fn simulated_metrics_stay_within_bounds(seed in any::<u64>(), epoch in 1usize..200) {
        let mut source = SimulatedMetrics::new(Some(seed));
        let m = source.next_metrics(epoch);
        let baseline = loss_baseline(epoch);
        prop_assert!(m.train_loss >= baseline && m.train_loss < baseline + 0.2);
        prop_assert!(m.valid_loss >= m.train_loss - 0.2);
        prop_assert!(m.train_acc < 1.0 && m.valid_acc < 1.0);
        prop_assert!(m.train_acc >= 0.5 && m.valid_acc >= 0.45);
    }
}

#[test]
fn simulated_loss_trends_downward() {
    let mut early = 0.0;
    let mut late = 0.0;
    for seed in 0..20 {
        let mut source = SimulatedMetrics::new(Some(seed));
        early += source.next_metrics(1).valid_loss;
        late += source.next_metrics(30).valid_loss;
    }
    assert!(late < early);
}
