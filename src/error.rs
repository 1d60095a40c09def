//! Error types for windowgate.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for windowgate operations.
///
/// A rejected request is not an error: it is reported as
/// [`Decision::Exceeded`](crate::ratelimit::Decision::Exceeded).
#[derive(Error, Debug)]
pub enum WindowGateError {
    /// Malformed limit specification or bucket name
    #[error("Invalid rate limit specification: {0}")]
    InvalidSpec(String),

    /// Unrecognized or wrong-typed option
    #[error("Invalid rate limit option: {0}")]
    InvalidOption(String),

    /// Backing store failed or timed out
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Environment settings could not be read
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Result type alias for windowgate operations.
pub type Result<T> = std::result::Result<T, WindowGateError>;
