use thiserror::Error;

/// Result type for sectioning operations
pub type Result<T> = std::result::Result<T, SectionerError>;

/// Errors that can occur while sectioning a document
#[derive(Error, Debug)]
pub enum SectionerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A line sequence violated numbering rules
    #[error("Invalid line numbering at line {line_no}: {reason}")]
    InvalidNumbering { line_no: usize, reason: String },
}

impl SectionerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
