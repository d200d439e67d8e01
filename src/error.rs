//! Error types for Slidegate.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Slidegate operations.
///
/// Admission checks themselves only fail with [`StoreError`]; this wraps it
/// together with the errors of the surrounding service.
#[derive(Error, Debug)]
pub enum SlidegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, SlidegateError>;
