use apiview_protocol::{CallError, ErrorKind};
use apiview_store::StoreError;
use thiserror::Error;

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search and indexing
#[derive(Error, Debug)]
pub enum SearchError {
    /// An index or embedding endpoint failed
    #[error("{target} call failed: {source}")]
    Call {
        target: String,
        #[source]
        source: CallError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SearchError {
    pub fn call(target: impl Into<String>, source: CallError) -> Self {
        Self::Call {
            target: target.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Call {
                source: CallError::Cancelled,
                ..
            } => ErrorKind::Cancelled,
            Self::Call { .. } => ErrorKind::RetrievalPartial,
            Self::Store(err) => err.kind(),
            Self::InvalidConfig(_) => ErrorKind::InputError,
            Self::Io(_) | Self::Serialization(_) | Self::Other(_) => ErrorKind::Fatal,
        }
    }
}
