//! # Geomaker ML
//!
//! Session orchestration for image-classification experiments: archive
//! ingestion into a class manifest, a timed training simulation with early
//! stopping, synthesis of cross-referenced evaluation artifacts, and
//! serialization of the session for exports and the assistant.

pub mod assistant;
pub mod classes;
pub mod context;
pub mod error;
pub mod export;
pub mod ingest;
pub mod results;
pub mod session;
pub mod training;

pub use assistant::AssistantConversation;
pub use classes::{EffectiveClasses, resolve_effective_classes};
pub use context::{ContextInput, ContextSnapshot, NOT_AVAILABLE, SessionContext, serialize_context};
pub use error::MlError;
pub use export::{ConfigEntry, ExportKind};
pub use ingest::{ArchiveManifest, IngestedArchive, SampleImage, ingest_archive};
pub use results::ResultsBundle;
pub use session::{RunStart, Session, SessionController, UploadReport};
pub use training::{
    EpochMetrics, MetricSource, MetricsSeries, RunStatus, SimulatedMetrics, TickOutcome,
};
