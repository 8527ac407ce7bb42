//! Cache Error Types

use crate::fetch::FetchError;

/// Errors surfaced by `RevisionContentCache` lookups
///
/// `Clone` so a single fetch outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Content of {key} is {size} bytes, over the {limit} byte limit")]
    SizeExceeded { key: String, size: u64, limit: u64 },

    #[error("Invalid revision key: {0}")]
    InvalidKey(String),

    #[error("Wait for content was cancelled")]
    Cancelled,
}

impl CacheError {
    /// Whether the underlying fetch may succeed if requested again
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Fetch(e) => e.is_retryable(),
            CacheError::Cancelled => true,
            CacheError::SizeExceeded { .. } | CacheError::InvalidKey(_) => false,
        }
    }
}
