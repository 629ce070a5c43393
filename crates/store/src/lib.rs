//! Document store gateway for guidelines, examples, memories and review jobs.
//!
//! Deletion is two-phase: [`DocumentStore::soft_delete`] flags a row, and the
//! garbage collector hard-deletes it once the search index no longer holds it.

mod backend;
mod database;
mod error;
mod links;
mod record;

pub use backend::{FileBackend, MemoryBackend, Precondition, StoreBackend};
pub use database::{ContainerCounts, DocumentStore};
pub use error::{Result, StoreError};
pub use links::{link_items, unlink_items, ItemRef, LinkReport};
pub use record::{ContainerName, RawDocument, Record, Setting, StoredDocument};

/// Setting holding the upstream commit the guideline corpus was last synced at.
pub const LAST_SYNCED_COMMIT_SETTING: &str = "last_synced_commit_sha";
