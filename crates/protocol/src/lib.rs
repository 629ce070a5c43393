//! Wire types shared by every APIView Copilot crate.
//!
//! Records stored in the document store, the review request/response shapes,
//! job records, the error taxonomy, and the retry policy used at every
//! external boundary.

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod error;
mod job;
mod language;
mod model;
pub mod retry;

pub use error::ErrorKind;
pub use job::{JobError, JobPhase, JobState, ReviewJob};
pub use language::{Language, GENERAL_LANGUAGE};
pub use model::{
    ClusterDecision, Comment, CommentSource, Example, ExistingComment, ExistingCommentInput,
    GroupingAudit, Guideline, GuidelineLayout, LayoutExample, Memory, Requirement, Review,
    ReviewRequest, ReviewStats, SectionFailure, Severity, SignatureGroup, CONFIDENCE_BUCKETS,
};
pub use retry::{CallError, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.as_str().to_string(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// JSON schema of the review response, used by prompts and `apiview schema`.
pub fn review_schema() -> Result<serde_json::Value> {
    let schema = schemars::schema_for!(Review);
    serde_json::to_value(schema).map_err(Into::into)
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

pub fn current_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
