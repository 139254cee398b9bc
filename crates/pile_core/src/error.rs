//! Error types for pile operations.

use crate::types::PilePointer;
use std::io;
use thiserror::Error;

/// Result type for pile operations.
pub type PileResult<T> = Result<T, PileError>;

/// Errors that can occur in pile operations.
#[derive(Debug, Error)]
pub enum PileError {
    /// Backing memory error.
    #[error("storage error: {0}")]
    Storage(#[from] pile_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A chunk header is neither USED nor FREE, or runs past its segment.
    ///
    /// The segment's byte stream can no longer be trusted.
    #[error("segment {segment} corrupted at address {address}: {message}")]
    Corruption {
        /// Index of the corrupted segment.
        segment: usize,
        /// Byte offset of the bad header.
        address: usize,
        /// Description of the corruption.
        message: String,
    },

    /// A pointer does not reference a live chunk.
    #[error("access violation at {pointer}: {reason}")]
    AccessViolation {
        /// The offending pointer.
        pointer: PilePointer,
        /// Why the pointer was rejected.
        reason: &'static str,
    },

    /// A value does not fit in a single segment.
    #[error("object of {size} bytes exceeds the segment size of {max} bytes")]
    ObjectTooLarge {
        /// Size of the requested chunk in bytes.
        size: usize,
        /// The configured segment size.
        max: usize,
    },

    /// A segment-count or memory limit would be exceeded.
    #[error("pile capacity exceeded: {message}")]
    CapacityExceeded {
        /// Which limit was hit.
        message: String,
    },

    /// The pile is closed or closing.
    #[error("pile is not running")]
    NotRunning,

    /// Configuration is out of bounds.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,
}

impl PileError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(segment: usize, address: usize, message: impl Into<String>) -> Self {
        Self::Corruption {
            segment,
            address,
            message: message.into(),
        }
    }

    /// Creates an access violation error.
    pub fn access_violation(pointer: PilePointer, reason: &'static str) -> Self {
        Self::AccessViolation { pointer, reason }
    }

    /// Creates a capacity exceeded error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns whether this error reports corrupted memory.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}
