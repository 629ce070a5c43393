//! # APIView Review Engine
//!
//! ```text
//! ReviewRequest ─> prepare ─> sections ─> retrieve (per section) ─> review prompts
//!                                                                     │
//!   Review <─ group <─ existing-comment filter <─ dedup <─ judge <─ merge
//! ```
//!
//! Per-section failures are recorded in [`apiview_protocol::ReviewStats`] and
//! only fail the review when they affect more than half of the sections.

mod comments;
mod config;
mod engine;
mod error;
mod existing;
mod grouper;
mod judge;
mod mention;
mod metadata;
mod metrics;

pub use comments::{normalize_reply, parse_line_numbers, resolve_id, KnownIds, Normalized};
pub use config::ReviewSettings;
pub use engine::{PhaseObserver, PreparedRequest, ReviewEngine};
pub use error::{Result, ReviewError};
pub use existing::{filter_existing, FILTER_EXISTING_PROMPT};
pub use grouper::{clear_orphans, group_by_signature, group_comments, signature, GROUP_GENERIC_PROMPT};
pub use judge::{dedup_pass, filter_pass, EvidenceIndex, FilterOutcome, JudgeRequest, JudgeScores, JUDGE_PROMPT};
pub use mention::{
    DispatchOutcome, MentionDispatcher, MentionRequest, Workflow, WorkflowRegistry, MENTION_PROMPT,
    NO_ACTION,
};
pub use metadata::LanguageGuidance;
pub use metrics::EngineMetrics;
