//! # Geomaker Core
//!
//! Shared foundation for the Geomaker workspace: layered configuration,
//! the error taxonomy, conversation types, and the conversational
//! collaborator backends used by the assistant.

pub mod collaborator;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root.
pub use collaborator::{ChatBackend, CollaboratorSession, MockBackend, create_backend};
pub use config::{
    AppConfig, IngestConfig, LlmConfig, RetryConfig, RunConfig, SynthesisConfig, TrainingConfig,
    config_exists, load_config,
};
pub use error::{ConfigError, LlmError};
pub use types::{ChatMessage, ChatRole, Turn};
