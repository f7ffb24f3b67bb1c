//! Error types for savenexus-core.

use thiserror::Error;

/// Result type alias for savenexus core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The path stack was popped with a name that is not its trailing segment.
    #[error("path stack mismatch: expected to pop '{expected}' from '{path}'")]
    PathMismatch { expected: String, path: String },

    /// More links were recorded than the configured limit allows.
    #[error("tree too large: link table limit of {0} entries exceeded")]
    TooManyLinks(usize),

    /// The in-memory data model is inconsistent.
    #[error("invalid data model: {0}")]
    InvalidModel(String),

    /// The conversion was cancelled by the caller.
    #[error("conversion cancelled")]
    Cancelled,
}
