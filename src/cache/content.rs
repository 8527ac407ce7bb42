//! Revision Content Cache
//!
//! Keeps the content of files at historical revisions in memory so repeated
//! requests do not go back to the repository. Content at a committed revision
//! never changes, so entries are only dropped to stay under the size ceiling
//! (least recently used first) or on explicit invalidation.
//!
//! At most one fetch per key runs at a time: concurrent callers for a key that
//! is being fetched wait for that fetch and share its outcome. LIVE keys always
//! go straight to the fetcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::flight::{Flight, SharedOutcome};
use super::listener::{CacheListener, LoggingListener};
use super::CacheError;
use crate::config::{CacheConfig, ConfigError};
use crate::execution::ExecutionMode;
use crate::fetch::{ContentFetcher, FetchError};
use crate::revision::RevisionKey;

/// Hex SHA-1 of a content buffer, the content address of a cache entry
pub fn content_digest(content: &[u8]) -> String {
    format!("{:x}", Sha1::digest(content))
}

/// Tracks cached content and its bookkeeping for LRU eviction
#[derive(Debug, Clone)]
struct CacheEntry {
    content: Bytes,
    size: u64,
    digest: String,
    /// Clock value at insertion (eviction tie-breaker)
    inserted: u64,
    /// Clock value at the last hit
    last_accessed: u64,
}

/// Mutable state guarded by the cache lock
#[derive(Default)]
struct Store {
    entries: HashMap<RevisionKey, CacheEntry>,
    in_flight: HashMap<RevisionKey, Arc<Flight>>,
    total_bytes: u64,
    /// Logical clock for access ordering
    clock: u64,
}

impl Store {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Return cached content and mark it as recently used
    fn touch(&mut self, key: &RevisionKey) -> Option<Bytes> {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = now;
        Some(entry.content.clone())
    }

    fn remove(&mut self, key: &RevisionKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Insert content, evicting least recently used entries until it fits
    ///
    /// Returns the evicted keys with their sizes.
    fn insert(
        &mut self,
        key: RevisionKey,
        content: Bytes,
        digest: String,
        ceiling: u64,
    ) -> Vec<(RevisionKey, u64)> {
        let size = content.len() as u64;
        self.remove(&key);

        let mut evicted = Vec::new();
        if self.total_bytes + size > ceiling {
            // Oldest access first, insertion order on ties
            let mut candidates: Vec<(u64, u64, RevisionKey)> = self
                .entries
                .iter()
                .map(|(k, e)| (e.last_accessed, e.inserted, k.clone()))
                .collect();
            candidates.sort_by_key(|(accessed, inserted, _)| (*accessed, *inserted));

            for (_, _, victim) in candidates {
                if self.total_bytes + size <= ceiling {
                    break;
                }
                if let Some(entry) = self.remove(&victim) {
                    evicted.push((victim, entry.size));
                }
            }
        }

        let now = self.tick();
        self.total_bytes += size;
        self.entries.insert(
            key,
            CacheEntry {
                content,
                size,
                digest,
                inserted: now,
                last_accessed: now,
            },
        );

        evicted
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups served from the store
    pub hits: u64,
    /// Lookups that had to fetch or join an in-flight fetch
    pub misses: u64,
    /// Fetcher invocations, LIVE requests included
    pub fetches: u64,
    /// Entries evicted to honor the size ceiling
    pub evictions: u64,
    /// Fetched contents rejected by the per-item limit
    pub rejected: u64,
    /// Entries currently stored
    pub entries: usize,
    /// Bytes currently stored
    pub total_bytes: u64,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.fetches,
            &self.evictions,
            &self.rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// What a caller does after consulting the store
enum Role {
    /// First caller for the key: performs the fetch
    Leader(Arc<Flight>),
    /// A fetch is already running: wait for its outcome
    Waiter(Arc<Flight>),
}

/// Size-bounded in-memory cache of file content at repository revisions
pub struct RevisionContentCache {
    config: CacheConfig,
    store: Mutex<Store>,
    counters: Counters,
    listener: Arc<dyn CacheListener>,
}

impl RevisionContentCache {
    /// Create a cache with the given limits and a logging listener
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_listener(config, Arc::new(LoggingListener))
    }

    /// Create a cache that reports pressure to `listener`
    ///
    /// # Arguments
    /// * `config` - Per-item limit and total ceiling, validated here
    /// * `listener` - Receives eviction and size-exceeded notifications
    pub fn with_listener(
        config: CacheConfig,
        listener: Arc<dyn CacheListener>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            per_item_limit = config.per_item_limit_bytes,
            total_ceiling = config.total_ceiling_bytes,
            "Revision content cache initialized"
        );

        Ok(Self {
            config,
            store: Mutex::new(Store::default()),
            counters: Counters::default(),
            listener,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the content for a key, fetching it if not cached
    ///
    /// LIVE keys are always fetched and never stored. For other keys a cached
    /// entry is returned without calling `fetcher`; otherwise the content is
    /// fetched once, shared with any concurrent callers for the same key, and
    /// stored. Failed or oversized fetches are not stored, so the next call
    /// tries again.
    pub fn get<F>(&self, key: &RevisionKey, fetcher: &F) -> Result<Bytes, CacheError>
    where
        F: ContentFetcher + ?Sized,
    {
        if key.is_live() {
            debug!(key = %key, "Live revision, bypassing cache");
            self.counters.fetches.fetch_add(1, Ordering::Relaxed);
            let content = fetcher.fetch(key)?;
            self.check_size(key, content.len() as u64)?;
            return Ok(Bytes::from(content));
        }

        let role = {
            let mut store = self.lock_store();

            if let Some(content) = store.touch(key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Content cache HIT");
                return Ok(content);
            }

            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            match store.in_flight.get(key) {
                Some(flight) => Role::Waiter(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::new());
                    store.in_flight.insert(key.clone(), Arc::clone(&flight));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Waiter(flight) => {
                debug!(key = %key, "Content cache MISS, joining in-flight fetch");
                flight.wait()
            }
            Role::Leader(flight) => {
                debug!(key = %key, "Content cache MISS, fetching");
                self.lead(key, fetcher, flight)
            }
        }
    }

    /// Like `get`, but rejects LIVE keys instead of fetching them
    pub fn get_strict<F>(&self, key: &RevisionKey, fetcher: &F) -> Result<Bytes, CacheError>
    where
        F: ContentFetcher + ?Sized,
    {
        if key.is_live() {
            return Err(CacheError::InvalidKey(format!(
                "{} does not name a concrete revision",
                key
            )));
        }
        self.get(key, fetcher)
    }

    /// Run `get` under an execution mode
    ///
    /// The mode decides how the calling thread is suspended; lookup, dedup and
    /// eviction are the same as for `get`.
    pub fn get_with(
        self: &Arc<Self>,
        key: &RevisionKey,
        fetcher: Arc<dyn ContentFetcher>,
        mode: &dyn ExecutionMode,
    ) -> Result<Bytes, CacheError> {
        let cache = Arc::clone(self);
        let owned_key = key.clone();
        let title = format!("Loading {}", key);

        mode.run(
            &title,
            Box::new(move || cache.get(&owned_key, fetcher.as_ref())),
        )
    }

    /// Run `get` on the tokio blocking pool
    pub async fn get_async(
        self: &Arc<Self>,
        key: &RevisionKey,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Result<Bytes, CacheError> {
        let cache = Arc::clone(self);
        let owned_key = key.clone();

        match tokio::task::spawn_blocking(move || cache.get(&owned_key, fetcher.as_ref())).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(key = %key, error = %e, "Content lookup task failed");
                Err(FetchError::Aborted.into())
            }
        }
    }

    /// Drop the entry for a key, if present
    ///
    /// A fetch already running for the key is detached: it stays the only
    /// fetch for the key and its callers, late joiners included, get its
    /// outcome, but the content is not stored.
    pub fn invalidate(&self, key: &RevisionKey) {
        let mut store = self.lock_store();
        let removed = store.remove(key).is_some();
        let detached = match store.in_flight.get(key) {
            Some(flight) => {
                flight.detach();
                true
            }
            None => false,
        };
        debug!(key = %key, removed = removed, detached = detached, "Invalidated cached content");
    }

    /// Drop all entries, detach running fetches and reset statistics
    pub fn clear(&self) {
        let mut store = self.lock_store();
        let entries = store.entries.len();
        store.entries.clear();
        for flight in store.in_flight.values() {
            flight.detach();
        }
        store.total_bytes = 0;
        self.counters.reset();
        debug!(entries = entries, "Cleared revision content cache");
    }

    /// Whether content for the key is stored
    pub fn contains(&self, key: &RevisionKey) -> bool {
        self.lock_store().entries.contains_key(key)
    }

    /// Content address of a stored entry
    pub fn digest(&self, key: &RevisionKey) -> Option<String> {
        self.lock_store()
            .entries
            .get(key)
            .map(|entry| entry.digest.clone())
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.lock_store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently stored
    pub fn total_bytes(&self) -> u64 {
        self.lock_store().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, total_bytes) = {
            let store = self.lock_store();
            (store.entries.len(), store.total_bytes)
        };

        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            entries,
            total_bytes,
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            fetches = stats.fetches,
            evictions = stats.evictions,
            rejected = stats.rejected,
            entries = stats.entries,
            total_bytes = stats.total_bytes,
            "Content cache metrics"
        );
    }

    /// Fetch as the leader of a flight and publish the outcome
    fn lead<F>(&self, key: &RevisionKey, fetcher: &F, flight: Arc<Flight>) -> Result<Bytes, CacheError>
    where
        F: ContentFetcher + ?Sized,
    {
        let guard = FlightGuard {
            cache: self,
            key,
            flight: Some(flight),
        };

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = match fetcher.fetch(key) {
            Ok(content) => self
                .check_size(key, content.len() as u64)
                .map(|()| Bytes::from(content)),
            Err(e) => {
                debug!(key = %key, error = %e, "Fetch failed, not caching");
                Err(e.into())
            }
        };

        guard.complete(outcome)
    }

    /// Store a successful outcome unless the flight was detached, then wake waiters
    fn finish(&self, key: &RevisionKey, flight: &Arc<Flight>, outcome: SharedOutcome) {
        let digest = match &outcome {
            Ok(content) => Some(content_digest(content)),
            Err(_) => None,
        };

        let evicted = {
            let mut store = self.lock_store();
            if store
                .in_flight
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, flight))
            {
                store.in_flight.remove(key);
            }
            // Read under the store lock so an invalidate cannot slip in between
            let keep = !flight.is_detached();

            match (&outcome, digest) {
                (Ok(content), Some(digest)) if keep => {
                    let evicted = store.insert(
                        key.clone(),
                        content.clone(),
                        digest,
                        self.config.total_ceiling_bytes,
                    );
                    debug!(
                        key = %key,
                        size = content.len(),
                        total_bytes = store.total_bytes,
                        "Stored revision content"
                    );
                    evicted
                }
                (Ok(_), _) => {
                    debug!(key = %key, "Fetch was detached by invalidation, not storing");
                    Vec::new()
                }
                (Err(_), _) => Vec::new(),
            }
        };

        flight.publish(outcome);

        if !evicted.is_empty() {
            warn!(
                count = evicted.len(),
                ceiling = self.config.total_ceiling_bytes,
                "Content cache over ceiling, evicted LRU entries"
            );
        }
        for (victim, size) in evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.listener.on_evicted(&victim, size);
        }
    }

    fn check_size(&self, key: &RevisionKey, size: u64) -> Result<(), CacheError> {
        let limit = self.config.per_item_limit_bytes;
        if size <= limit {
            return Ok(());
        }

        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        self.listener.on_size_exceeded(key, size, limit);
        Err(CacheError::SizeExceeded {
            key: key.to_string(),
            size,
            limit,
        })
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes `Aborted` if the leader unwinds before completing its flight
struct FlightGuard<'a> {
    cache: &'a RevisionContentCache,
    key: &'a RevisionKey,
    flight: Option<Arc<Flight>>,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: SharedOutcome) -> SharedOutcome {
        if let Some(flight) = self.flight.take() {
            self.cache.finish(self.key, &flight, outcome.clone());
        }
        outcome
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            warn!(key = %self.key, "Fetch unwound without a result");
            self.cache
                .finish(self.key, &flight, Err(FetchError::Aborted.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Fetcher returning fixed content and counting calls
    struct CountingFetcher {
        content: Vec<u8>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(content: &[u8]) -> Self {
            Self {
                content: content.to_vec(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(content: &[u8], delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(content)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ContentFetcher for CountingFetcher {
        fn fetch(&self, _key: &RevisionKey) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(self.content.clone())
        }
    }

    /// Fetcher that always fails
    struct FailingFetcher {
        calls: AtomicUsize,
    }

    impl FailingFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ContentFetcher for FailingFetcher {
        fn fetch(&self, key: &RevisionKey) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Network(format!("connection refused for {}", key)))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        evicted: Mutex<Vec<RevisionKey>>,
        oversized: Mutex<Vec<(RevisionKey, u64, u64)>>,
    }

    impl CacheListener for RecordingListener {
        fn on_evicted(&self, key: &RevisionKey, _size: u64) {
            self.evicted.lock().unwrap().push(key.clone());
        }

        fn on_size_exceeded(&self, key: &RevisionKey, size: u64, limit: u64) {
            self.oversized.lock().unwrap().push((key.clone(), size, limit));
        }
    }

    fn key(rev: u64) -> RevisionKey {
        RevisionKey::at("https://x/svn", "/trunk/a.txt", rev).unwrap()
    }

    fn cache(per_item: u64, ceiling: u64) -> RevisionContentCache {
        RevisionContentCache::new(CacheConfig::new(per_item, ceiling)).unwrap()
    }

    /// Poll until `condition` holds, failing after a few seconds
    fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..5_000 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_cached_content_wins_over_failing_fetcher() {
        let cache = cache(100, 1000);
        let fetcher = CountingFetcher::new(b"0123456789");

        let first = cache.get(&key(5), &fetcher).unwrap();
        assert_eq!(first.as_ref(), b"0123456789");

        let failing = FailingFetcher::new();
        let second = cache.get(&key(5), &failing).unwrap();
        assert_eq!(second, first);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.calls(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.fetches), (1, 1, 1));
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn test_live_revision_always_fetches() {
        let cache = cache(100, 1000);
        let fetcher = CountingFetcher::new(b"head");
        let live = RevisionKey::live("https://x/svn", "/trunk/a.txt").unwrap();

        cache.get(&live, &fetcher).unwrap();
        cache.get(&live, &fetcher).unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(cache.is_empty());
        assert!(!cache.contains(&live));
    }

    #[test]
    fn test_live_content_still_size_checked() {
        let cache = cache(4, 1000);
        let live = RevisionKey::live("https://x/svn", "/trunk/a.txt").unwrap();
        assert!(matches!(
            cache.get(&live, &CountingFetcher::new(b"too long")),
            Err(CacheError::SizeExceeded { size: 8, limit: 4, .. })
        ));
    }

    #[test]
    fn test_strict_get_rejects_live() {
        let cache = cache(100, 1000);
        let fetcher = CountingFetcher::new(b"head");
        let live = RevisionKey::live("https://x/svn", "/trunk/a.txt").unwrap();

        assert!(matches!(
            cache.get_strict(&live, &fetcher),
            Err(CacheError::InvalidKey(_))
        ));
        assert_eq!(fetcher.calls(), 0);
        assert!(cache.get_strict(&key(1), &fetcher).is_ok());
    }

    #[test]
    fn test_concurrent_gets_share_one_fetch() {
        const CALLERS: usize = 8;
        let cache = Arc::new(cache(100, 1000));
        let fetcher = Arc::new(CountingFetcher::slow(b"shared", Duration::from_millis(200)));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetcher = Arc::clone(&fetcher);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(&key(7), fetcher.as_ref())
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap().as_ref(), b"shared");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_concurrent_failure_reaches_every_waiter() {
        const CALLERS: usize = 6;
        let cache = Arc::new(cache(100, 1000));
        let calls = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    let fetcher = move |_: &RevisionKey| -> Result<Vec<u8>, FetchError> {
                        calls.fetch_add(1, Ordering::SeqCst);
                        while !released.load(Ordering::SeqCst) {
                            thread::sleep(Duration::from_millis(1));
                        }
                        Err(FetchError::NotFound("/trunk/a.txt".to_string()))
                    };
                    cache.get(&key(3), &fetcher)
                })
            })
            .collect();

        // Hold the fetch until every caller has looked the key up
        wait_until(|| cache.stats().misses == CALLERS as u64);
        released.store(true, Ordering::SeqCst);

        for handle in handles {
            assert_eq!(
                handle.join().unwrap(),
                Err(CacheError::Fetch(FetchError::NotFound("/trunk/a.txt".to_string())))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&key(3)));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = cache(100, 1000);
        let failing = FailingFetcher::new();

        assert!(matches!(
            cache.get(&key(2), &failing),
            Err(CacheError::Fetch(FetchError::Network(_)))
        ));
        assert!(cache.get(&key(2), &failing).is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

        let fetcher = CountingFetcher::new(b"recovered");
        assert_eq!(cache.get(&key(2), &fetcher).unwrap().as_ref(), b"recovered");
    }

    #[test]
    fn test_invalidate_and_clear_force_refetch() {
        let cache = cache(100, 1000);
        let fetcher = CountingFetcher::new(b"abc");

        cache.get(&key(1), &fetcher).unwrap();
        cache.get(&key(2), &fetcher).unwrap();
        assert_eq!(fetcher.calls(), 2);

        cache.invalidate(&key(1));
        cache.invalidate(&key(99));
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.total_bytes(), 3);

        cache.get(&key(1), &fetcher).unwrap();
        assert_eq!(fetcher.calls(), 3);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.stats().hits, 0);

        cache.get(&key(2), &fetcher).unwrap();
        assert_eq!(fetcher.calls(), 4);
    }

    #[test]
    fn test_lru_eviction_under_ceiling() {
        let listener = Arc::new(RecordingListener::default());
        let cache = RevisionContentCache::with_listener(
            CacheConfig::new(40, 100),
            Arc::clone(&listener) as Arc<dyn CacheListener>,
        )
        .unwrap();
        let forty = CountingFetcher::new(&[b'x'; 40]);

        cache.get(&key(1), &forty).unwrap();
        cache.get(&key(2), &forty).unwrap();
        // Touch 1 so 2 becomes least recently used
        cache.get(&key(1), &forty).unwrap();
        assert_eq!(forty.calls(), 2);

        cache.get(&key(3), &forty).unwrap();
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.total_bytes(), 80);
        assert_eq!(*listener.evicted.lock().unwrap(), vec![key(2)]);
        assert_eq!(cache.stats().evictions, 1);

        // The evicted key is fetched again
        cache.get(&key(2), &forty).unwrap();
        assert_eq!(forty.calls(), 4);
        assert!(cache.total_bytes() <= 100);
    }

    #[test]
    fn test_eviction_frees_enough_for_large_entry() {
        let cache = cache(100, 100);
        let small = CountingFetcher::new(&[b's'; 30]);
        let large = CountingFetcher::new(&[b'l'; 90]);

        cache.get(&key(1), &small).unwrap();
        cache.get(&key(2), &small).unwrap();
        cache.get(&key(3), &small).unwrap();
        assert_eq!(cache.total_bytes(), 90);

        cache.get(&key(4), &large).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(4)));
        assert_eq!(cache.total_bytes(), 90);
    }

    #[test]
    fn test_oversized_content_rejected_and_store_unchanged() {
        let listener = Arc::new(RecordingListener::default());
        let cache = RevisionContentCache::with_listener(
            CacheConfig::new(100, 1000),
            Arc::clone(&listener) as Arc<dyn CacheListener>,
        )
        .unwrap();

        let big = CountingFetcher::new(&[0u8; 101]);
        let err = cache.get(&key(8), &big).unwrap_err();
        assert_eq!(
            err,
            CacheError::SizeExceeded {
                key: key(8).to_string(),
                size: 101,
                limit: 100,
            }
        );
        assert!(cache.is_empty());
        assert_eq!(listener.oversized.lock().unwrap().len(), 1);

        let small = CountingFetcher::new(b"ok");
        assert_eq!(cache.get(&key(8), &small).unwrap().as_ref(), b"ok");
        assert!(cache.contains(&key(8)));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_panicking_fetcher_releases_waiters() {
        let cache = Arc::new(cache(100, 1000));
        let started = Arc::new(Barrier::new(2));

        let worker = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                let fetcher = move |_: &RevisionKey| -> Result<Vec<u8>, FetchError> {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    panic!("fetcher bug");
                };
                cache.get(&key(4), &fetcher)
            })
        };

        started.wait();
        let waiter_fetcher = CountingFetcher::new(b"fresh");
        assert_eq!(
            cache.get(&key(4), &waiter_fetcher),
            Err(CacheError::Fetch(FetchError::Aborted))
        );
        assert_eq!(waiter_fetcher.calls(), 0);
        assert!(worker.join().is_err());

        // The key was released, so the next caller fetches again
        assert_eq!(cache.get(&key(4), &waiter_fetcher).unwrap().as_ref(), b"fresh");
        assert_eq!(waiter_fetcher.calls(), 1);
    }

    /// Detach a running fetch with `detach`, then check that a caller arriving
    /// afterwards joins it instead of starting a second fetch
    fn check_detached_fetch_stays_single(detach: impl Fn(&RevisionContentCache)) {
        let cache = Arc::new(cache(100, 1000));
        let calls = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));

        let gated: Arc<dyn ContentFetcher> = {
            let calls = Arc::clone(&calls);
            let released = Arc::clone(&released);
            Arc::new(move |_: &RevisionKey| -> Result<Vec<u8>, FetchError> {
                calls.fetch_add(1, Ordering::SeqCst);
                while !released.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(b"stale".to_vec())
            })
        };
        let spawn_get = |fetcher: Arc<dyn ContentFetcher>| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&key(6), fetcher.as_ref()))
        };

        let leader = spawn_get(Arc::clone(&gated));
        wait_until(|| calls.load(Ordering::SeqCst) == 1);

        detach(cache.as_ref());
        let misses = cache.stats().misses;
        let joiner = spawn_get(Arc::clone(&gated));
        wait_until(|| cache.stats().misses == misses + 1);
        released.store(true, Ordering::SeqCst);

        assert_eq!(leader.join().unwrap().unwrap().as_ref(), b"stale");
        assert_eq!(joiner.join().unwrap().unwrap().as_ref(), b"stale");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&key(6)));

        // The detached content was not stored, so the next caller fetches
        let fresh = CountingFetcher::new(b"fresh");
        assert_eq!(cache.get(&key(6), &fresh).unwrap().as_ref(), b"fresh");
        assert_eq!(fresh.calls(), 1);
        assert!(cache.contains(&key(6)));
    }

    #[test]
    fn test_invalidate_detaches_running_fetch() {
        check_detached_fetch_stays_single(|cache| cache.invalidate(&key(6)));
    }

    #[test]
    fn test_clear_detaches_running_fetch() {
        check_detached_fetch_stays_single(|cache| cache.clear());
    }

    #[test]
    fn test_digest_is_content_address() {
        let cache = cache(100, 1000);
        cache.get(&key(1), &CountingFetcher::new(b"abc")).unwrap();
        assert_eq!(
            cache.digest(&key(1)).as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(cache.digest(&key(2)), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(RevisionContentCache::new(CacheConfig::new(200, 100)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_async_uses_cache() {
        let cache = Arc::new(cache(100, 1000));
        let fetcher = Arc::new(CountingFetcher::new(b"async"));

        let first = cache
            .get_async(&key(9), Arc::clone(&fetcher) as Arc<dyn ContentFetcher>)
            .await
            .unwrap();
        let second = cache
            .get_async(&key(9), Arc::clone(&fetcher) as Arc<dyn ContentFetcher>)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
    }
}
