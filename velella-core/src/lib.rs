//! Shared primitives for the Velella Hi-C toolkit.
//!
//! `velella-core` provides the foundation the format and CLI crates build on:
//!
//! - **Error types** — [`Error`] and [`Result`] for structured error handling
//! - **Compression** — zlib helpers for block-compressed matrix bodies
//! - **Binary streams** — random-access file reads and little-endian decoding

pub mod compress;
pub mod error;
pub mod stream;

pub use error::{Error, Result};
pub use stream::{ByteCursor, FileCursor, RandomAccessFile};
