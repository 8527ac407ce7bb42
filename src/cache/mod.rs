//! Revision content caching layer
//!
//! Serves file content at repository revisions from memory, with at most one
//! concurrent fetch per revision and a bounded total size.

pub mod content;
pub mod errors;
mod flight;
pub mod listener;

pub use content::{content_digest, CacheStats, RevisionContentCache};
pub use errors::CacheError;
pub use listener::{CacheListener, LoggingListener};
