use apiview_ingest::IngestError;
use apiview_prompt::PromptError;
use apiview_protocol::ErrorKind;
use apiview_review::ReviewError;
use apiview_search::SearchError;
use apiview_store::StoreError;
use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidInput(_) | Self::JobNotFound(_) => ErrorKind::InputError,
            Self::Review(err) => err.kind(),
            Self::Ingest(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::Search(err) => err.kind(),
            Self::Prompt(err) => err.kind(),
            Self::Metrics(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Fatal,
        }
    }
}
