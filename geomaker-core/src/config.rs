//! Configuration system for Geomaker.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/geomaker/config.toml` and/or `.geomaker/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for a Geomaker session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Assistant collaborator (LLM) settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Archive ingestion limits.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Training scheduler cadence.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Result synthesis parameters.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Default run configuration applied to new sessions.
    #[serde(default)]
    pub run: RunConfig,
}

impl AppConfig {
    /// Validate the whole configuration and return human-readable warnings.
    ///
    /// Never errors: problematic values are reported so the caller can surface them.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.run.validate());
        if self.ingest.max_samples_per_class == 0 || self.ingest.max_total_samples == 0 {
            warnings.push("ingest sample limits are 0; no sample images will be kept".to_string());
        }
        if self.ingest.default_num_classes == 0 {
            warnings.push(
                "ingest.default_num_classes is 0; placeholder class sets will be empty"
                    .to_string(),
            );
        }
        if self.training.tick_interval_ms == 0 {
            warnings.push("training.tick_interval_ms is 0; epochs will run back to back".to_string());
        }
        warnings
    }
}

/// Configuration for the conversational collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "gemini", "openai", or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.5-flash").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`; never written back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 2048,
            temperature: 0.7,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !matches!(self.provider.as_str(), "gemini" | "openai" | "mock") {
            warnings.push(format!(
                "unknown llm.provider '{}'; expected gemini, openai or mock",
                self.provider
            ));
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        warnings
    }
}

/// Exponential backoff retry policy for collaborator requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Limits applied while ingesting an uploaded archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum sample images kept per class.
    pub max_samples_per_class: usize,
    /// Maximum sample images kept across all classes.
    pub max_total_samples: usize,
    /// Size of the placeholder class set used when no archive classes are available.
    pub default_num_classes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_samples_per_class: 3,
            max_total_samples: 10,
            default_num_classes: 3,
        }
    }
}

/// Scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Delay between simulated epochs, in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 700,
        }
    }
}

/// Parameters for the synthetic result artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Fixed RNG seed for reproducible runs. `None` draws from OS entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Projected points generated per class for each clustering method.
    pub cluster_points_per_class: usize,
    /// Number of augmented-embedding points.
    pub augmented_points: usize,
    /// Upper bound on misclassified samples reported.
    pub max_error_samples: usize,
    /// Number of points on each ROC/PR curve.
    pub curve_points: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            seed: None,
            cluster_points_per_class: 15,
            augmented_points: 50,
            max_error_samples: 5,
            curve_points: 11,
        }
    }
}

/// The user-facing run configuration (model, hyperparameters, evaluation options).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model_name: String,
    /// Full fine-tuning: class identity comes from the uploaded archive.
    pub fine_tune: bool,
    /// Configured class count; superseded by the archive when `fine_tune` is set.
    pub num_classes: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub train_split: f64,
    pub valid_split: f64,
    pub validation_strategy: String,
    pub l2_lambda: f64,
    /// Early-stopping patience in epochs.
    pub patience: usize,
    pub use_weighted_loss: bool,
    /// Attach an uncertainty score to single-image inspections.
    pub simulated_uncertainty: bool,
    pub optimizer: String,
    pub lr_scheduler: String,
    pub augmentation: String,
    /// Explainability (CAM) method name.
    pub explainability_method: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_name: "ResNet50".to_string(),
            fine_tune: true,
            num_classes: 3,
            epochs: 20,
            learning_rate: 0.001,
            batch_size: 32,
            train_split: 0.7,
            valid_split: 0.2,
            validation_strategy: "holdout".to_string(),
            l2_lambda: 0.0001,
            patience: 5,
            use_weighted_loss: false,
            simulated_uncertainty: true,
            optimizer: "Adam".to_string(),
            lr_scheduler: "ReduceLROnPlateau".to_string(),
            augmentation: "standard".to_string(),
            explainability_method: "Grad-CAM".to_string(),
        }
    }
}

impl RunConfig {
    /// Validate run parameters and return warnings for suspicious values.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.epochs == 0 {
            warnings.push(
                "run.epochs is 0; a training run cannot start until it is at least 1".to_string(),
            );
        }
        if self.patience == 0 {
            warnings.push(
                "run.patience is 0; early stopping triggers on the first non-improving epoch"
                    .to_string(),
            );
        }
        if self.train_split + self.valid_split > 1.0 + f64::EPSILON {
            warnings.push(format!(
                "train_split ({}) + valid_split ({}) exceeds 1.0",
                self.train_split, self.valid_split
            ));
        }
        if self.learning_rate <= 0.0 {
            warnings.push(format!("learning_rate ({}) must be positive", self.learning_rate));
        }
        warnings
    }
}

/// Load configuration with layered sources.
///
/// Order: defaults, user config, workspace config, `GEOMAKER_` environment
/// variables (nested with `__`, e.g. `GEOMAKER_RUN__EPOCHS=10`), explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("ai", "geomaker", "geomaker") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".geomaker").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed("GEOMAKER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("ai", "geomaker", "geomaker") {
        if config_dir.config_dir().join("config.toml").exists() {
            return true;
        }
    }

    workspace.is_some_and(|ws| ws.join(".geomaker").join("config.toml").exists())
}
