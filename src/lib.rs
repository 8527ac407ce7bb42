//! revcache - revision content cache for Subversion history
//!
//! Serves the content of files at repository revisions, fetching each
//! historical revision at most once and keeping the results in a size-bounded
//! LRU store. The live head of a repository is never cached.

pub mod cache;
pub mod config;
pub mod execution;
pub mod fetch;
pub mod revision;

pub use cache::{CacheError, CacheListener, CacheStats, RevisionContentCache};
pub use config::CacheConfig;
pub use execution::{CancelToken, Direct, ExecutionMode, ForegroundBlocking};
pub use fetch::{ContentFetcher, FetchError, FetcherRegistry, SvnCliFetcher};
pub use revision::{FileRevision, Revision, RevisionKey};
