//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// A container operation failed on a specific path.
    #[error("{op} failed on {path}: {source}")]
    Operation {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Invalid file format or unsupported content.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// No node exists at the path.
    #[error("no such node: {0}")]
    NotFound(String),

    /// A node already exists at the path.
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// A recorded link points at a path missing from the destination.
    #[error("link {link} targets {target}, which does not exist in the destination")]
    UnresolvedLink { link: String, target: String },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] savenexus_core::Error),
}

impl Error {
    /// True when the conversion stopped because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::CoreError(savenexus_core::Error::Cancelled) => true,
            Self::Operation { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Attach the failing operation and path to an error.
pub(crate) trait Context<T> {
    fn context(self, op: &'static str, path: &str) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context(self, op: &'static str, path: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            // Keep the innermost operation; it names the primitive that failed.
            err @ Error::Operation { .. } => err,
            err => Error::Operation {
                op,
                path: path.to_string(),
                source: Box::new(err),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_names_operation_and_path() {
        let res: std::result::Result<(), Error> = Err(Error::NotFound("/entry".to_string()));
        let err = res.context("open group", "/entry").unwrap_err();
        assert_eq!(
            err.to_string(),
            "open group failed on /entry: no such node: /entry"
        );
    }

    #[test]
    fn test_context_keeps_innermost_operation() {
        let res: std::result::Result<(), Error> = Err(Error::NotFound("/a".to_string()));
        let err = res
            .context("read dataset", "/a")
            .context("copy dataset", "/a")
            .unwrap_err();
        assert!(err.to_string().starts_with("read dataset failed"));
    }

    #[test]
    fn test_cancelled_is_detected_through_context() {
        let res: std::result::Result<(), savenexus_core::Error> =
            Err(savenexus_core::Error::Cancelled);
        let err = res.context("write slab", "/entry/bank1/data").unwrap_err();
        assert!(err.is_cancelled());
    }
}
