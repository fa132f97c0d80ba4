//! Error types for the rate limiter.

use thiserror::Error;

/// Main error type for rate limiter operations.
///
/// Exceeding a limit is not an error; see [`crate::ratelimit::Decision`].
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A counter store cannot be used (missing capability, unreachable backend).
    /// Raised at construction time only.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A single increment or sweep against an otherwise usable store failed.
    #[error("Store operation failed: {0}")]
    StoreOperationFailed(String),

    /// A rule that can never be evaluated correctly.
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
