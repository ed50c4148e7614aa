//! Typed errors for the piece store
//!
//! Only caller-supplied data can fail recoverably here: wire-format bitfields
//! and storage wiring. Index and offset preconditions are programmer errors
//! and are asserted at entry instead of surfaced as `Err`.

use thiserror::Error;

/// Main error type for the piece store
#[derive(Debug, Error)]
pub enum StoreError {
    /// A wire bitfield had the wrong byte length for this download
    #[error("bitfield length mismatch: expected {expected} bytes, got {actual}")]
    BitfieldLength { expected: usize, actual: usize },

    /// Storage wiring was requested for a download with no file entries
    #[error("cannot initialize storage: download context has no file entries")]
    NoFileEntries,

    /// Download geometry that cannot describe any piece layout
    #[error("invalid download geometry: {message}")]
    InvalidGeometry { message: String },
}

impl StoreError {
    /// Create a bitfield length error
    pub fn bitfield_length(expected: usize, actual: usize) -> Self {
        Self::BitfieldLength { expected, actual }
    }

    /// Create a geometry error
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }
}

/// Result type alias for piece store operations
pub type Result<T> = std::result::Result<T, StoreError>;
