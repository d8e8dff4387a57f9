//! Error types for the modelops lifecycle core.
//!
//! This module provides a unified error type [`ModelOpsError`] for all
//! lifecycle operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors are organized into the following categories:
//!
//! - **Data**: bad or missing training data, deterministic and never
//!   retried.
//! - **Backend**: the training backend or the durable store is
//!   unreachable or failed; the original cause is preserved in the
//!   message. [`Store`](ModelOpsError::Store) is the variant external
//!   store implementations report through.
//! - **Invariant**: promoting a version that does not exist, rolling back
//!   with no history. These are explicit failed-operation results.
//! - **Configuration**: invalid settings, fatal at construction time.
//!
//! # Example
//!
//! ```rust
//! use modelops::error::{ModelOpsError, Result};
//!
//! fn quality_gate(accuracy: f64, minimum: f64) -> Result<()> {
//!     if accuracy < minimum {
//!         return Err(ModelOpsError::Validation(format!(
//!             "accuracy {:.3} below minimum {:.3}",
//!             accuracy, minimum
//!         )));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Main error type for modelops operations.
#[derive(Error, Debug)]
pub enum ModelOpsError {
    // Data errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Backend errors
    #[error("Training failed: {0}")]
    Training(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Store error: {0}")]
    Store(String),

    // Invariant violations
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No rollback target for model: {0}")]
    NoRollbackTarget(String),

    // Configuration errors
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // External errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ModelOpsError {
    /// Check if the error is worth retrying.
    ///
    /// Data and invariant errors are deterministic and never retryable;
    /// backend unavailability and timeouts may clear on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelOpsError::Training(_) | ModelOpsError::Timeout(_) | ModelOpsError::Store(_)
        )
    }
}

impl From<serde_json::Error> for ModelOpsError {
    fn from(e: serde_json::Error) -> Self {
        ModelOpsError::Serialization(e.to_string())
    }
}

/// Result type alias for modelops operations.
pub type Result<T> = std::result::Result<T, ModelOpsError>;
