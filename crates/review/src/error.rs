use apiview_prompt::PromptError;
use apiview_protocol::ErrorKind;
use apiview_search::SearchError;
use apiview_sectioner::SectionerError;
use apiview_store::StoreError;
use thiserror::Error;

/// Result type for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Error, Debug)]
pub enum ReviewError {
    /// Malformed request: unknown language, empty target, bad sectioner limits
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sectioning failed: {0}")]
    Sectioner(#[from] SectionerError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// More than half of the sections failed
    #[error("{failed} of {total} sections failed; first failure: {first}")]
    TooManySectionFailures {
        failed: usize,
        total: usize,
        first: String,
        kind: ErrorKind,
    },

    #[error("review cancelled")]
    Cancelled,

    #[error("review exceeded its {after_ms}ms deadline")]
    DeadlineExceeded { after_ms: u64 },

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ReviewError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::Sectioner(_) => ErrorKind::InputError,
            Self::Prompt(err) => err.kind(),
            Self::Search(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::TooManySectionFailures { kind, .. } => *kind,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } | Self::Metrics(_) | Self::Io(_) | Self::Other(_) => {
                ErrorKind::Fatal
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
