//! Service layer of APIView Copilot.
//!
//! `CopilotConfig` is resolved once, `ServiceContext` wires the store, search,
//! prompt runner and review engine from it, and the long-running pieces live
//! here too: the review job manager with its retention sweeper, the garbage
//! collector finishing two-phase deletes, and the health probe.

pub mod config;
mod context;
mod error;
mod gc;
mod health;
mod jobs;
mod memory;

pub use config::{
    CopilotConfig, EmbeddingMode, IngestConfig, LlmConfig, LlmMode, PathsConfig, SearchConfig,
    SourceKind, CONFIG_ENV, DEFAULT_CONFIG_FILE,
};
pub use context::ServiceContext;
pub use error::{Result, ServiceError};
pub use gc::{GarbageCollector, GcReport};
pub use health::{ContainerHealth, HealthReport, HealthStatus};
pub use jobs::JobManager;
pub use memory::{RecordMemoryWorkflow, RECORD_MEMORY_ACTION};
