//! Error types for backing memory operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while creating, mapping or reading backing memory.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An access fell outside the memory region.
    #[error("access out of bounds: offset {offset}, len {len}, size {size}")]
    OutOfBounds {
        /// The requested offset.
        offset: usize,
        /// The requested length.
        len: usize,
        /// The region length.
        size: usize,
    },

    /// Bytes read as a string were not valid UTF-8.
    #[error("invalid UTF-8 at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string.
        offset: usize,
    },

    /// A mapped file has a length the pile cannot address.
    #[error("invalid memory length {len} for {path:?}")]
    InvalidLength {
        /// The file path.
        path: PathBuf,
        /// The offending length.
        len: u64,
    },

    /// The memory has been released by `delete_and_dispose`.
    #[error("memory has been disposed")]
    Disposed,
}
