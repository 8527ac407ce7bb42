//! Remote content retrieval
//!
//! The cache knows nothing about protocols: callers hand it a `ContentFetcher`
//! per request. This module defines that capability, a scheme-keyed registry
//! of fetchers, and an implementation backed by the `svn` command-line client.

pub mod errors;
pub mod registry;
pub mod svn;

pub use errors::FetchError;
pub use registry::FetcherRegistry;
pub use svn::SvnCliFetcher;

use std::ops::Deref;

use crate::revision::{Revision, RevisionKey};

/// Retrieves the full content of a file at a revision
///
/// Implementations must be re-entrant: the cache calls `fetch` without holding
/// any of its locks, possibly from several threads at once for different keys.
pub trait ContentFetcher: Send + Sync {
    fn fetch(&self, key: &RevisionKey) -> Result<Vec<u8>, FetchError>;

    /// Fetch with the URL resolved at `peg` instead of the operative revision
    ///
    /// Fetchers that cannot resolve URLs at a peg fall back to `fetch`.
    fn fetch_at_peg(&self, key: &RevisionKey, peg: Revision) -> Result<Vec<u8>, FetchError> {
        let _ = peg;
        self.fetch(key)
    }
}

impl<F> ContentFetcher for F
where
    F: Fn(&RevisionKey) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, key: &RevisionKey) -> Result<Vec<u8>, FetchError> {
        self(key)
    }
}

/// Routes every `fetch` of the wrapped fetcher through `fetch_at_peg`
pub struct Pegged<T> {
    inner: T,
    peg: Revision,
}

impl<T> Pegged<T> {
    pub fn new(inner: T, peg: Revision) -> Self {
        Self { inner, peg }
    }
}

impl<T> ContentFetcher for Pegged<T>
where
    T: Deref + Send + Sync,
    T::Target: ContentFetcher,
{
    fn fetch(&self, key: &RevisionKey) -> Result<Vec<u8>, FetchError> {
        self.inner.fetch_at_peg(key, self.peg)
    }
}
