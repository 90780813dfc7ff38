//! Error Types

use thiserror::Error;

/// Result type alias for invoice store operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Invoice store errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// The durable store could not be read or parsed at startup
    #[error("Failed to load invoice store from {location}: {reason}")]
    StoreLoad { location: String, reason: String },

    /// A durable write failed after the cache was updated
    #[error("Failed to persist invoice store: {0}")]
    Persistence(String),

    /// An invoice with this id is already tracked
    #[error("Invoice already tracked: {0}")]
    DuplicateInvoice(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn store_load(location: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::StoreLoad {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the operation can be attempted again (e.g. via `flush`)
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Persistence(_))
    }
}
