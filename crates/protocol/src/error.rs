use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes surfaced by the review pipeline and its collaborators.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    RetrievalPartial,
    PromptFailure,
    JudgeFailure,
    StoreConflict,
    Cancelled,
    Fatal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputError => "input_error",
            Self::RetrievalPartial => "retrieval_partial",
            Self::PromptFailure => "prompt_failure",
            Self::JudgeFailure => "judge_failure",
            Self::StoreConflict => "store_conflict",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        }
    }

    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InputError => 400,
            Self::StoreConflict | Self::Cancelled => 409,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
