//! Fetcher lookup by repository scheme
//!
//! Maps a capability key (the URL scheme of the repository location) to a
//! resolver that produces the fetcher for that scheme. Unknown keys are a
//! recoverable `InvalidKey` error, never a panic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::ContentFetcher;
use crate::cache::CacheError;
use crate::revision::RevisionKey;

type Resolver = Box<dyn Fn() -> Arc<dyn ContentFetcher> + Send + Sync>;

/// Registry of fetchers keyed by URL scheme
#[derive(Default)]
pub struct FetcherRegistry {
    resolvers: HashMap<String, Resolver>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for a scheme, replacing any previous one
    pub fn register<F>(&mut self, scheme: &str, resolver: F)
    where
        F: Fn() -> Arc<dyn ContentFetcher> + Send + Sync + 'static,
    {
        self.resolvers
            .insert(scheme.to_ascii_lowercase(), Box::new(resolver));
    }

    /// Register one shared fetcher instance for several schemes
    pub fn register_shared(&mut self, schemes: &[&str], fetcher: Arc<dyn ContentFetcher>) {
        for scheme in schemes {
            let fetcher = Arc::clone(&fetcher);
            self.register(scheme, move || Arc::clone(&fetcher));
        }
    }

    /// Whether a resolver exists for the scheme
    pub fn supports(&self, scheme: &str) -> bool {
        self.resolvers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Resolve the fetcher for a scheme
    pub fn resolve(&self, scheme: &str) -> Result<Arc<dyn ContentFetcher>, CacheError> {
        match self.resolvers.get(&scheme.to_ascii_lowercase()) {
            Some(resolver) => {
                debug!(scheme = scheme, "Resolved content fetcher");
                Ok(resolver())
            }
            None => Err(CacheError::InvalidKey(format!(
                "no fetcher registered for scheme {:?}",
                scheme
            ))),
        }
    }

    /// Resolve the fetcher for a key's repository location
    pub fn resolve_for(&self, key: &RevisionKey) -> Result<Arc<dyn ContentFetcher>, CacheError> {
        let scheme = key.scheme().ok_or_else(|| {
            CacheError::InvalidKey(format!("repository location has no scheme: {}", key.repository()))
        })?;
        self.resolve(scheme)
    }
}
