use apiview_prompt::PromptError;
use apiview_protocol::{CallError, ErrorKind};
use apiview_search::SearchError;
use apiview_store::StoreError;
use thiserror::Error;

/// Result type for ingestion
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while syncing the guideline corpus
#[derive(Error, Debug)]
pub enum IngestError {
    /// The upstream repository could not be read
    #[error("upstream {source_id}: {source}")]
    Upstream {
        source_id: String,
        #[source]
        source: CallError,
    },

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    pub fn upstream(source_id: impl Into<String>, source: CallError) -> Self {
        Self::Upstream {
            source_id: source_id.into(),
            source,
        }
    }

    pub fn git(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Upstream {
                source: CallError::Cancelled,
                ..
            }
            | Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(err) => err.kind(),
            Self::Search(err) => err.kind(),
            Self::Prompt(err) => err.kind(),
            Self::InvalidInput(_) => ErrorKind::InputError,
            Self::Upstream { .. } | Self::Git { .. } | Self::Io(_) | Self::Other(_) => {
                ErrorKind::Fatal
            }
        }
    }
}
