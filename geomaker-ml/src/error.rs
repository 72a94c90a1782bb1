//! Error types for the geomaker-ml crate.

use geomaker_core::LlmError;
use thiserror::Error;

/// Top-level error type for session orchestration.
#[derive(Debug, Error)]
pub enum MlError {
    /// The archive contained no class folder with a qualifying image.
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// The archive could not be read at all.
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Results unavailable: {0}")]
    ResultsUnavailable(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Assistant error: {0}")]
    Llm(#[from] LlmError),
}

impl MlError {
    pub fn empty_dataset(msg: impl Into<String>) -> Self {
        Self::EmptyDataset(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn results_unavailable(msg: impl Into<String>) -> Self {
        Self::ResultsUnavailable(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Whether this is an upload failure the session recovers from by
    /// falling back to the placeholder class set.
    pub fn is_upload_failure(&self) -> bool {
        matches!(self, Self::EmptyDataset(_) | Self::Archive(_))
    }
}
