//! The session state object and its transition functions.
//!
//! [`Session`] is the single source of truth for one analysis session.
//! Everything that changes it goes through `apply_archive`, `begin_run`,
//! `tick`, `cancel_run`, `update_config` or `inspect_image`; readers get
//! projections (`context`, exports) computed from the current state.

pub mod controller;

pub use controller::SessionController;

use crate::classes::{
    EffectiveClasses, FALLBACK_PREFIX, placeholder_names, resolve_effective_classes,
};
use crate::context::{ContextInput, SessionContext, serialize_context};
use crate::error::MlError;
use crate::ingest::{ArchiveManifest, IngestedArchive, SampleImage, SkippedImage, ingest_archive};
use crate::results::{self, InspectionResult, ResultsBundle, inspection};
use crate::training::{
    MetricSource, MetricsSeries, RunStatus, TickOutcome, TrainingLog, TrainingProgress,
    TrainingScheduler,
};
use geomaker_core::{AppConfig, IngestConfig, RunConfig, SynthesisConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

/// Outcome of a successful archive upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub file_name: String,
    pub class_names: Vec<String>,
    pub total_images: usize,
    pub samples: usize,
    pub skipped: Vec<SkippedImage>,
    /// `(old, new)` when the configured class count was adjusted.
    pub num_classes_adjusted: Option<(usize, usize)>,
}

/// A validated run that has not been committed yet.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    config: RunConfig,
    classes: EffectiveClasses,
    warnings: Vec<String>,
}

/// Returned by a committed run start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStart {
    pub run_id: u64,
    pub classes: EffectiveClasses,
    pub warnings: Vec<String>,
}

/// One analysis session: configuration, archive, run state and results.
#[derive(Debug, Clone)]
pub struct Session {
    config: RunConfig,
    ingest: IngestConfig,
    synthesis: SynthesisConfig,
    archive: Option<IngestedArchive>,
    detected_classes: Vec<String>,
    scheduler: TrainingScheduler,
    results: Option<ResultsBundle>,
    rng: StdRng,
}

impl Session {
    pub fn new(app: &AppConfig) -> Self {
        let rng = match app.synthesis.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config: app.run.clone(),
            ingest: app.ingest.clone(),
            synthesis: app.synthesis.clone(),
            archive: None,
            detected_classes: placeholder_names(FALLBACK_PREFIX, app.ingest.default_num_classes),
            scheduler: TrainingScheduler::new(),
            results: None,
            rng,
        }
    }

    /// Replace the archive with `bytes`.
    ///
    /// Any run, its metrics, log and results are discarded whether or not the
    /// archive is usable. On failure no manifest is kept and the detected
    /// class view falls back to the placeholder set.
    pub fn apply_archive(&mut self, file_name: &str, bytes: &[u8]) -> Result<UploadReport, MlError> {
        let parsed = ingest_archive(file_name, bytes, &self.ingest);

        self.scheduler.reset();
        self.results = None;

        let ingested = match parsed {
            Ok(ingested) => ingested,
            Err(e) => {
                warn!(archive = file_name, error = %e, "Upload failed; using placeholder classes");
                self.archive = None;
                self.detected_classes =
                    placeholder_names(FALLBACK_PREFIX, self.ingest.default_num_classes);
                return Err(e);
            }
        };

        let detected = ingested.manifest.num_classes();
        let previous = self.config.num_classes;
        let adjust = self.config.fine_tune
            || [0, 2, self.ingest.default_num_classes].contains(&previous);
        let num_classes_adjusted = if adjust && previous != detected {
            self.config.num_classes = detected;
            info!(from = previous, to = detected, "Configured class count follows the archive");
            Some((previous, detected))
        } else {
            None
        };

        let report = UploadReport {
            file_name: file_name.to_string(),
            class_names: ingested.manifest.class_names(),
            total_images: ingested.manifest.total_images(),
            samples: ingested.samples.len(),
            skipped: ingested.skipped.clone(),
            num_classes_adjusted,
        };
        self.detected_classes = report.class_names.clone();
        self.archive = Some(ingested);
        Ok(report)
    }

    /// Validate the current configuration for a new run without mutating anything.
    pub fn prepare_run(&self) -> Result<PreparedRun, MlError> {
        let manifest = self.manifest().ok_or_else(|| {
            MlError::invalid_configuration("Upload a dataset archive before starting training")
        })?;
        if self.config.epochs == 0 {
            return Err(MlError::invalid_configuration("Number of epochs must be at least 1"));
        }

        let mut config = self.config.clone();
        let mut warnings = Vec::new();
        if config.fine_tune && config.num_classes != manifest.num_classes() {
            warnings.push(format!(
                "Full fine-tuning is active: the number of classes ({}) and their names come from the archive. The configured class count was adjusted.",
                manifest.num_classes()
            ));
            config.num_classes = manifest.num_classes();
        }

        let classes = resolve_effective_classes(&config, Some(manifest), self.ingest.default_num_classes);
        if classes.count == 0 {
            return Err(MlError::invalid_configuration(
                "Number of classes must be greater than zero",
            ));
        }
        Ok(PreparedRun {
            config,
            classes,
            warnings,
        })
    }

    /// Commit a prepared run: reset metrics, tracker and results and enter `Running`.
    pub fn commit_run(&mut self, prepared: PreparedRun) -> RunStart {
        for warning in &prepared.warnings {
            warn!(warning = warning.as_str(), "Run configuration corrected");
        }
        self.config = prepared.config.clone();
        self.results = None;
        let run_id = self.scheduler.begin(prepared.config, prepared.classes.clone());
        RunStart {
            run_id,
            classes: prepared.classes,
            warnings: prepared.warnings,
        }
    }

    /// Validate and start a new run in one step.
    pub fn begin_run(&mut self) -> Result<RunStart, MlError> {
        let prepared = self.prepare_run()?;
        Ok(self.commit_run(prepared))
    }

    /// Advance run `run_id` by one epoch. Results are synthesized exactly once,
    /// on the tick that terminates the run.
    pub fn tick(&mut self, run_id: u64, source: &mut dyn MetricSource) -> TickOutcome {
        let outcome = self.scheduler.tick(run_id, source);
        if let TickOutcome::Finished { .. } = outcome {
            let classes = self
                .scheduler
                .classes()
                .cloned()
                .unwrap_or_else(|| self.effective_classes());
            let samples = self.archive.as_ref().map(|a| a.samples.as_slice()).unwrap_or(&[]);
            self.results = Some(results::synthesize(&classes, samples, &self.synthesis, &mut self.rng));
        }
        outcome
    }

    /// Stop the active run, keeping partial metrics. Returns false when nothing ran.
    pub fn cancel_run(&mut self) -> bool {
        self.scheduler.cancel()
    }

    /// Replace the run configuration and return warnings about it.
    ///
    /// With fine-tuning active and an archive loaded the class count is
    /// forced to the archive's.
    pub fn update_config(&mut self, mut config: RunConfig) -> Vec<String> {
        let mut warnings = config.validate();
        if let Some(manifest) = self.manifest() {
            if config.fine_tune && config.num_classes != manifest.num_classes() {
                warnings.push(format!(
                    "Full fine-tuning uses the {} classes found in the archive; class count adjusted.",
                    manifest.num_classes()
                ));
                config.num_classes = manifest.num_classes();
            }
        }
        info!(model = config.model_name.as_str(), epochs = config.epochs, "Configuration updated");
        self.config = config;
        warnings
    }

    /// Run a simulated prediction on one image and attach it to the results.
    pub fn inspect_image(&mut self, image_name: &str, bytes: &[u8]) -> Result<InspectionResult, MlError> {
        if self.results.is_none() {
            return Err(MlError::results_unavailable(
                "Train a model before inspecting individual images",
            ));
        }
        let classes = self
            .scheduler
            .classes()
            .cloned()
            .unwrap_or_else(|| self.effective_classes());
        let result = inspection::inspect_image(image_name, bytes, &classes, &self.config, &mut self.rng);
        if let Some(results) = self.results.as_mut() {
            results.individual_inspection = Some(result.clone());
        }
        info!(image = image_name, predicted = result.predicted_class.as_str(), "Image inspected");
        Ok(result)
    }

    /// Serialize the session for the collaborator or for display.
    pub fn context(&self, domain_hint: Option<&str>) -> Result<SessionContext, MlError> {
        serialize_context(&ContextInput {
            config: &self.config,
            manifest: self.manifest(),
            samples: self.samples(),
            metrics: self.scheduler.metrics(),
            results: self.results.as_ref(),
            domain_hint,
            default_num_classes: self.ingest.default_num_classes,
        })
    }

    /// Effective classes for the current configuration and archive.
    pub fn effective_classes(&self) -> EffectiveClasses {
        resolve_effective_classes(&self.config, self.manifest(), self.ingest.default_num_classes)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Configuration and classes behind the current results. Without
    /// results this is the current configuration.
    pub fn results_configuration(&self) -> (RunConfig, EffectiveClasses) {
        if self.results.is_some() {
            if let (Some(config), Some(classes)) = (self.scheduler.config(), self.scheduler.classes()) {
                return (config.clone(), classes.clone());
            }
        }
        (self.config.clone(), self.effective_classes())
    }

    pub fn manifest(&self) -> Option<&ArchiveManifest> {
        self.archive.as_ref().map(|a| &a.manifest)
    }

    pub fn archive_file_name(&self) -> Option<&str> {
        self.manifest().map(|m| m.file_name.as_str())
    }

    pub fn samples(&self) -> &[SampleImage] {
        self.archive.as_ref().map(|a| a.samples.as_slice()).unwrap_or(&[])
    }

    /// Class names shown for the last upload (placeholders after a failure).
    pub fn detected_classes(&self) -> &[String] {
        &self.detected_classes
    }

    pub fn status(&self) -> RunStatus {
        self.scheduler.status()
    }

    pub fn run_id(&self) -> u64 {
        self.scheduler.run_id()
    }

    pub fn progress(&self) -> Option<&TrainingProgress> {
        self.scheduler.progress()
    }

    pub fn metrics(&self) -> &MetricsSeries {
        self.scheduler.metrics()
    }

    pub fn log(&self) -> &TrainingLog {
        self.scheduler.log()
    }

    pub fn results(&self) -> Option<&ResultsBundle> {
        self.results.as_ref()
    }

    pub fn results_available(&self) -> bool {
        self.results.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::simulation::ScriptedMetrics;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Write};
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

    fn app() -> AppConfig {
        let mut app = AppConfig::default();
        app.synthesis.seed = Some(11);
        app.run.epochs = 5;
        app.run.patience = 2;
        app
    }

    fn pets() -> Vec<u8> {
        zip_of(&[("cats/a.jpg", b"a"), ("cats/b.png", b"b"), ("dogs/c.jpg", b"c")])
    }

    #[test]
    fn test_upload_adjusts_class_count() {
        let mut session = Session::new(&app());
        let report = session.apply_archive("pets.zip", &pets()).unwrap();
        assert_eq!(report.class_names, vec!["cats", "dogs"]);
        assert_eq!(report.num_classes_adjusted, Some((3, 2)));
        assert_eq!(session.config().num_classes, 2);
        assert_eq!(session.detected_classes(), ["cats", "dogs"]);
    }

    #[test]
    fn test_upload_keeps_custom_count_without_fine_tune() {
        let mut app = app();
        app.run.fine_tune = false;
        app.run.num_classes = 7;
        let mut session = Session::new(&app);
        let report = session.apply_archive("pets.zip", &pets()).unwrap();
        assert_eq!(report.num_classes_adjusted, None);
        assert_eq!(session.config().num_classes, 7);
    }

    #[test]
    fn test_failed_upload_falls_back_to_placeholders() {
        let mut session = Session::new(&app());
        session.apply_archive("pets.zip", &pets()).unwrap();
        let err = session.apply_archive("notes.zip", &zip_of(&[("readme.txt", b"x")])).unwrap_err();
        assert!(err.is_upload_failure());
        assert!(session.manifest().is_none());
        assert_eq!(
            session.detected_classes(),
            ["Default Class A", "Default Class B", "Default Class C"]
        );

        let err = session.apply_archive("broken.zip", b"not a zip").unwrap_err();
        assert!(matches!(err, MlError::Archive(_)));
    }

    #[test]
    fn test_begin_run_requires_archive_and_leaves_state_alone() {
        let mut session = Session::new(&app());
        let before = session.run_id();
        let err = session.begin_run().unwrap_err();
        assert!(matches!(err, MlError::InvalidConfiguration(_)));
        assert_eq!(session.run_id(), before);
        assert_eq!(session.status(), RunStatus::Idle);
    }

    #[test]
    fn test_begin_run_rejects_zero_classes() {
        let mut app = app();
        app.run.fine_tune = false;
        app.run.num_classes = 5;
        let mut session = Session::new(&app);
        session.apply_archive("pets.zip", &pets()).unwrap();
        let mut config = session.config().clone();
        config.num_classes = 0;
        session.update_config(config);
        assert!(matches!(session.begin_run(), Err(MlError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_fine_tune_mismatch_is_corrected_with_warning() {
        let mut session = Session::new(&app());
        session.apply_archive("pets.zip", &pets()).unwrap();
        session.config.num_classes = 9;
        let start = session.begin_run().unwrap();
        assert_eq!(start.warnings.len(), 1);
        assert_eq!(start.classes.names, vec!["cats", "dogs"]);
        assert_eq!(session.config().num_classes, 2);
    }

    #[test]
    fn test_run_produces_results_once() {
        let mut session = Session::new(&app());
        session.apply_archive("pets.zip", &pets()).unwrap();
        let start = session.begin_run().unwrap();
        let mut source = ScriptedMetrics::new(vec![1.0, 0.9, 0.8, 0.7, 0.6]);

        let mut finished = 0;
        for _ in 0..5 {
            if let TickOutcome::Finished { status, .. } = session.tick(start.run_id, &mut source) {
                assert_eq!(status, RunStatus::Completed);
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
        let results = session.results().unwrap();
        assert_eq!(results.class_names, vec!["cats", "dogs"]);
        assert_eq!(session.tick(start.run_id, &mut source), TickOutcome::Stale);
    }

    #[test]
    fn test_inspect_requires_results() {
        let mut session = Session::new(&app());
        assert!(matches!(
            session.inspect_image("x.jpg", b"x"),
            Err(MlError::ResultsUnavailable(_))
        ));
    }

    #[test]
    fn test_inspect_attaches_to_results() {
        let mut session = Session::new(&app());
        session.apply_archive("pets.zip", &pets()).unwrap();
        let start = session.begin_run().unwrap();
        let mut source = ScriptedMetrics::improving_then_flat(5);
        while session.status() == RunStatus::Running {
            session.tick(start.run_id, &mut source);
        }
        let inspected = session.inspect_image("probe.png", b"png").unwrap();
        assert!(["cats", "dogs"].contains(&inspected.predicted_class.as_str()));
        assert_eq!(
            session.results().unwrap().individual_inspection.as_ref(),
            Some(&inspected)
        );
    }

    #[test]
    fn test_update_config_forces_archive_count_under_fine_tune() {
        let mut session = Session::new(&app());
        session.apply_archive("pets.zip", &pets()).unwrap();
        let mut config = session.config().clone();
        config.num_classes = 4;
        let warnings = session.update_config(config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(session.config().num_classes, 2);
    }
}
