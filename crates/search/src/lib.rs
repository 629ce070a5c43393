//! # APIView Search
//!
//! Hybrid retrieval over the guideline, example and memory indices.
//!
//! ```text
//! query ──> Embedder ──> vector scores ─┐
//!   │                                   ├──> HybridFusion ──> ranked ids ──> DocumentStore
//!   └─────> tokenize ──> BM25 scores ───┘
//! ```
//!
//! [`SearchIndexer`] mirrors the document store into the indices, and
//! [`SearchManager::build_context`] follows record links to assemble the
//! evidence bundle rendered into review prompts.

mod context;
mod embeddings;
mod error;
mod fusion;
mod index;
mod indexer;
mod manager;
mod tokenize;

pub use context::Context;
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder};
pub use error::{Result, SearchError};
pub use fusion::{FusionMode, HybridFusion};
pub use index::{Hit, IndexDocument, IndexQuery, LocalIndex, SearchIndex};
pub use indexer::{IndexSet, Indexable, IndexerReport, IndexerState, IndexerStatus, SearchIndexer};
pub use manager::{Retrieved, Scored, SearchManager, SearchResults, SearchSettings};
pub use tokenize::tokenize;

use std::path::Path;
use std::sync::Arc;

/// In-memory indices for all three containers.
pub fn local_indices(fusion: HybridFusion) -> IndexSet {
    IndexSet {
        guidelines: Arc::new(LocalIndex::new("guidelines", fusion)),
        examples: Arc::new(LocalIndex::new("examples", fusion)),
        memories: Arc::new(LocalIndex::new("memories", fusion)),
    }
}

/// File-backed indices under `dir`.
pub async fn open_local_indices(dir: &Path, fusion: HybridFusion) -> std::io::Result<IndexSet> {
    Ok(IndexSet {
        guidelines: Arc::new(LocalIndex::open("guidelines", fusion, dir.join("guidelines.json")).await?),
        examples: Arc::new(LocalIndex::open("examples", fusion, dir.join("examples.json")).await?),
        memories: Arc::new(LocalIndex::open("memories", fusion, dir.join("memories.json")).await?),
    })
}
