use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of equal-width buckets in `ReviewStats::confidence_histogram`.
pub const CONFIDENCE_BUCKETS: usize = 10;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Must,
    Should,
    May,
}

/// A normative rule enforced by the reviewer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Guideline {
    pub id: String,
    pub language: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<Requirement>,
    /// Ids of linked `Example` records.
    #[serde(default)]
    pub examples: Vec<String>,
    pub content_hash: String,
    #[serde(default)]
    pub last_synced_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub related_guidelines: Vec<String>,
    #[serde(default)]
    pub related_memories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Curated good/bad snippet linked to guidelines.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Example {
    pub id: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_code: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub guideline_ids: Vec<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Example {
    pub fn has_code(&self) -> bool {
        self.good_code.as_deref().is_some_and(|c| !c.trim().is_empty())
            || self.bad_code.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Curated reviewer insight.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Memory {
    pub id: String,
    pub language: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub related_guideline_ids: Vec<String>,
    #[serde(default)]
    pub related_example_ids: Vec<String>,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct LayoutExample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_code: Option<String>,
}

/// On-disk guideline layout shared with downstream consumers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct GuidelineLayout {
    pub id: String,
    pub title: String,
    pub text: String,
    pub category: String,
    pub language: String,
    pub examples: Vec<LayoutExample>,
    pub related_guidelines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Must,
    Should,
    Suggestion,
}

impl Severity {
    /// Lower ordinals win deduplication ties.
    pub const fn ordinal(&self) -> u8 {
        match self {
            Self::Must => 0,
            Self::Should => 1,
            Self::Suggestion => 2,
        }
    }

    /// Lenient parse of model output; unknown values become `Suggestion`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "must" | "must_fix" | "must fix" | "required" | "error" => Self::Must,
            "should" | "should_fix" | "should fix" | "warning" | "recommended" => Self::Should,
            _ => Self::Suggestion,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CommentSource {
    Guideline,
    Generic,
    Context,
}

impl CommentSource {
    /// Merge priority inside a section: guideline, context, generic.
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Guideline => 0,
            Self::Context => 1,
            Self::Generic => 2,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guideline => "guideline",
            Self::Generic => "generic",
            Self::Context => "context",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Comment {
    pub line_no: u32,
    #[serde(rename = "code", alias = "code_excerpt", default)]
    pub code_excerpt: String,
    pub text: String,
    pub severity: Severity,
    #[serde(default)]
    pub guideline_ids: Vec<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    pub confidence: f32,
    #[serde(default)]
    pub is_generic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub source: CommentSource,
}

impl Comment {
    /// Recomputes `is_generic` from the link sets.
    pub fn normalize_generic(&mut self) {
        self.is_generic = self.guideline_ids.is_empty() && self.memory_ids.is_empty();
    }

    pub fn references(&self) -> BTreeSet<&str> {
        self.guideline_ids
            .iter()
            .chain(self.memory_ids.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn overlaps(&self, other: &Comment) -> bool {
        let mine = self.references();
        other.references().iter().any(|id| mine.contains(id))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct SectionFailure {
    pub chunk_index: usize,
    pub kind: crate::ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct SignatureGroup {
    pub signature: String,
    pub correlation_id: String,
    pub line_nos: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ClusterDecision {
    pub line_nos: Vec<u32>,
    pub accepted: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Audit trail of both grouping stages.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct GroupingAudit {
    #[serde(default)]
    pub signature_groups: Vec<SignatureGroup>,
    #[serde(default)]
    pub generic_clusters: Vec<ClusterDecision>,
    #[serde(default)]
    pub generic_stage_skipped: bool,
    /// Correlation ids cleared because they ended up with fewer than two members.
    #[serde(default)]
    pub orphaned_ids_cleared: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ReviewStats {
    pub tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    pub prompt_ms: u64,
    #[serde(default)]
    pub prompt_calls: u64,
    pub retrieval_hits: u64,
    #[serde(default)]
    pub retrieval_partial: bool,
    #[serde(default)]
    pub sections: usize,
    #[serde(default)]
    pub section_errors: usize,
    #[serde(default)]
    pub section_failures: Vec<SectionFailure>,
    #[serde(default)]
    pub malformed_comments: usize,
    #[serde(default)]
    pub diff_filtered: usize,
    #[serde(default)]
    pub judge_skipped: bool,
    #[serde(default)]
    pub judge_dropped: usize,
    #[serde(default)]
    pub dedup_dropped: usize,
    #[serde(default)]
    pub existing_filtered: usize,
    #[serde(default)]
    pub confidence_histogram: Vec<u32>,
    #[serde(default)]
    pub grouping: GroupingAudit,
}

impl Default for ReviewStats {
    fn default() -> Self {
        Self {
            tokens: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            prompt_ms: 0,
            prompt_calls: 0,
            retrieval_hits: 0,
            retrieval_partial: false,
            sections: 0,
            section_errors: 0,
            section_failures: Vec::new(),
            malformed_comments: 0,
            diff_filtered: 0,
            judge_skipped: false,
            judge_dropped: 0,
            dedup_dropped: 0,
            existing_filtered: 0,
            confidence_histogram: vec![0; CONFIDENCE_BUCKETS],
            grouping: GroupingAudit::default(),
        }
    }
}

impl ReviewStats {
    pub fn record_confidence(&mut self, confidence: f32) {
        if self.confidence_histogram.len() != CONFIDENCE_BUCKETS {
            self.confidence_histogram = vec![0; CONFIDENCE_BUCKETS];
        }
        let clamped = confidence.clamp(0.0, 1.0);
        let bucket = ((clamped * CONFIDENCE_BUCKETS as f32) as usize).min(CONFIDENCE_BUCKETS - 1);
        self.confidence_histogram[bucket] += 1;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Review {
    pub comments: Vec<Comment>,
    pub stats: ReviewStats,
}

/// Reviewer comment already present on the revision under review.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ExistingComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_no: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub is_resolved: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum ExistingCommentInput {
    Text(String),
    Detailed(ExistingComment),
}

impl From<ExistingCommentInput> for ExistingComment {
    fn from(input: ExistingCommentInput) -> Self {
        match input {
            ExistingCommentInput::Text(text) => ExistingComment {
                line_no: None,
                author: None,
                text,
                is_resolved: false,
            },
            ExistingCommentInput::Detailed(comment) => comment,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ReviewRequest {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    pub language: String,
    #[serde(default)]
    pub comments: Vec<ExistingCommentInput>,
}

impl ReviewRequest {
    /// `base` with empty strings treated as absent.
    pub fn effective_base(&self) -> Option<&str> {
        self.base.as_deref().filter(|b| !b.is_empty())
    }
}
