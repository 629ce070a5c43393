//! # APIView Guideline Ingestion
//!
//! Keeps the document store in step with the upstream Markdown corpus.
//!
//! ```text
//! UpstreamSource ─> changed files ─> GuidelineParser ─> content hash ─┬─> unchanged: skip
//!                                                                     └─> store write ─> SearchIndexer
//! ```
//!
//! The stored `last_synced_commit_sha` only moves once every file of a run
//! was processed, so a failed file is retried by the next sync.

mod canonical;
mod error;
mod export;
mod git;
mod github;
mod ingestor;
mod markdown;
mod source;

pub use canonical::{canonicalize, example_hash, guideline_hash};
pub use error::{IngestError, Result};
pub use export::export_guidelines;
pub use git::GitCheckoutSource;
pub use github::GithubSource;
pub use ingestor::{IngestSettings, Ingestor, SyncOptions, SyncReport, EXTRACT_PROMPT};
pub use markdown::{slugify, GuidelineFile, GuidelineParser, ParsedGuideline};
pub use source::{DirectorySource, UpstreamSource};
