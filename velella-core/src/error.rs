//! Structured error types for the Velella toolkit.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for all Velella operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed on-disk data: bad magic, short read, failed decompression,
    /// inconsistent index.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Invalid input (bad arguments, unknown chromosome, out-of-range values)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A query the storage layout cannot answer (below-diagonal interval
    /// pair, reversed coordinates)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Missing resolution, normalization vector, or dataset
    #[error("not found: {0}")]
    NotFound(String),

    /// Output already exists and overwriting was not requested
    #[error("refusing to overwrite {}; pass --force to overwrite", .0.display())]
    Overwrite(PathBuf),
}

/// Convenience alias used throughout the Velella workspace.
pub type Result<T> = std::result::Result<T, Error>;
