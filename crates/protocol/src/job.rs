use crate::{ErrorKind, Review};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, JobState::Running)
                | (Self::Queued, JobState::Failed)
                | (Self::Running, JobState::Running)
                | (Self::Running, JobState::Succeeded)
                | (Self::Running, JobState::Failed)
        )
    }
}

/// Fine-grained engine progress, persisted alongside the coarse state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Queued,
    Preparing,
    Chunking,
    Retrieving,
    Reviewing,
    Judging,
    Grouping,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub const fn state(&self) -> JobState {
        match self {
            Self::Queued => JobState::Queued,
            Self::Succeeded => JobState::Succeeded,
            Self::Failed => JobState::Failed,
            _ => JobState::Running,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ReviewJob {
    pub id: String,
    pub language: String,
    pub state: JobState,
    pub phase: JobPhase,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    pub input_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Review>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl ReviewJob {
    pub fn queued(id: String, language: String, input_fingerprint: String, now_ms: u64) -> Self {
        Self {
            id,
            language,
            state: JobState::Queued,
            phase: JobPhase::Queued,
            created_at: now_ms,
            started_at: None,
            finished_at: None,
            input_fingerprint,
            result: None,
            error: None,
        }
    }

    /// Whether the retention window has passed. Non-terminal jobs never expire.
    pub fn is_expired(&self, now_ms: u64, retention_seconds: u64) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        let Some(finished_at) = self.finished_at else {
            return false;
        };
        finished_at.saturating_add(retention_seconds.saturating_mul(1000)) < now_ms
    }
}
