use apiview_protocol::{CallError, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for prompt operations
pub type Result<T> = std::result::Result<T, PromptError>;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("prompt template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    /// Malformed template or inputs that do not match it
    #[error("template {name}: {message}")]
    Template { name: String, message: String },

    #[error("prompt {prompt} failed: {source}")]
    Call {
        prompt: String,
        #[source]
        source: CallError,
    },

    /// The model did not produce usable JSON even after the corrective retry
    #[error("prompt {prompt} returned invalid JSON: {detail}")]
    InvalidJson { prompt: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromptError {
    pub fn template(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Call {
                source: CallError::Cancelled,
                ..
            } => ErrorKind::Cancelled,
            Self::Call { .. } | Self::InvalidJson { .. } => ErrorKind::PromptFailure,
            Self::TemplateNotFound { .. } | Self::Template { .. } | Self::Io(_) => ErrorKind::Fatal,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Call {
                source: CallError::Cancelled,
                ..
            }
        )
    }
}
