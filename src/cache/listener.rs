//! Cache pressure notifications

use tracing::{info, warn};

use crate::revision::RevisionKey;

/// Receives notifications about cache pressure
///
/// Called without any cache lock held, so implementations may call back into
/// the cache.
pub trait CacheListener: Send + Sync {
    /// An entry was evicted to make room under the size ceiling
    fn on_evicted(&self, _key: &RevisionKey, _size: u64) {}

    /// Fetched content was rejected for exceeding the per-item limit
    fn on_size_exceeded(&self, _key: &RevisionKey, _size: u64, _limit: u64) {}
}

/// Default listener: logs every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl CacheListener for LoggingListener {
    fn on_evicted(&self, key: &RevisionKey, size: u64) {
        info!(key = %key, size = size, "Evicted revision content");
    }

    fn on_size_exceeded(&self, key: &RevisionKey, size: u64, limit: u64) {
        warn!(key = %key, size = size, limit = limit, "Revision content too large to load");
    }
}
