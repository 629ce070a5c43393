use crate::record::ContainerName;
use apiview_protocol::ErrorKind;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the document store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{container}/{id} not found")]
    NotFound { container: ContainerName, id: String },

    /// Optimistic concurrency lost
    #[error("concurrent modification of {container}/{id}")]
    Conflict { container: ContainerName, id: String },

    #[error("{container}/{id} already exists")]
    AlreadyExists { container: ContainerName, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(container: ContainerName, id: impl Into<String>) -> Self {
        Self::NotFound {
            container,
            id: id.into(),
        }
    }

    pub fn conflict(container: ContainerName, id: impl Into<String>) -> Self {
        Self::Conflict {
            container,
            id: id.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::StoreConflict,
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::InvalidInput(_) => {
                ErrorKind::InputError
            }
            Self::Io(_) | Self::Serialization(_) | Self::Other(_) => ErrorKind::Fatal,
        }
    }
}
