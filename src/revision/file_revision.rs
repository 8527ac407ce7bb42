//! File revisions
//!
//! A file at one point of its history: where it lives, who committed it and
//! when, and the revisions merged into it. Content is loaded on demand through
//! a `RevisionContentCache`.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Revision, RevisionKey};
use crate::cache::{CacheError, RevisionContentCache};
use crate::execution::ExecutionMode;
use crate::fetch::{ContentFetcher, Pegged};

/// One entry of a repository log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub revision: u64,
    pub author: Option<String>,
    pub date: Option<SystemTime>,
    pub message: Option<String>,
}

/// Commit summary of a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    /// Committed revision number, `None` for the live head
    pub revision: Option<u64>,
    pub date: Option<SystemTime>,
    pub author: Option<String>,
}

/// A file at a specific revision of its history
#[derive(Debug, Clone)]
pub struct FileRevision {
    key: RevisionKey,
    /// Revision at which the URL is resolved, when it differs from the operative one
    peg: Option<Revision>,
    author: Option<String>,
    date: Option<SystemTime>,
    commit_message: Option<String>,
    /// Path this file was copied from at this revision, if any
    copy_from_path: Option<String>,
    /// Revisions merged into this one, in the order they were recorded
    merge_sources: Vec<FileRevision>,
}

impl FileRevision {
    pub fn new(key: RevisionKey) -> Self {
        Self {
            key,
            peg: None,
            author: None,
            date: None,
            commit_message: None,
            copy_from_path: None,
            merge_sources: Vec::new(),
        }
    }

    /// Build a revision of `path` from a log entry
    pub fn from_log_entry(
        repository: &str,
        path: &str,
        entry: LogEntry,
    ) -> Result<Self, CacheError> {
        let key = RevisionKey::at(repository, path, entry.revision)?;
        Ok(Self {
            author: entry.author,
            date: entry.date,
            commit_message: entry.message,
            ..Self::new(key)
        })
    }

    pub fn with_peg(mut self, peg: Revision) -> Self {
        self.peg = Some(peg);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_date(mut self, date: SystemTime) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_copy_from(mut self, path: impl Into<String>) -> Self {
        self.copy_from_path = Some(path.into());
        self
    }

    pub fn key(&self) -> &RevisionKey {
        &self.key
    }

    pub fn revision(&self) -> Revision {
        self.key.revision()
    }

    pub fn peg_revision(&self) -> Option<Revision> {
        self.peg
    }

    pub fn url(&self) -> String {
        self.key.url()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn date(&self) -> Option<SystemTime> {
        self.date
    }

    pub fn commit_message(&self) -> Option<&str> {
        self.commit_message.as_deref()
    }

    /// Replace the commit message, e.g. after a revision property edit
    pub fn set_commit_message(&mut self, message: impl Into<String>) {
        self.commit_message = Some(message.into());
    }

    pub fn copy_from_path(&self) -> Option<&str> {
        self.copy_from_path.as_deref()
    }

    pub fn commit_info(&self) -> CommitInfo {
        CommitInfo {
            revision: self.key.revision().number(),
            date: self.date,
            author: self.author.clone(),
        }
    }

    /// Record a revision merged into this one
    pub fn add_merge_source(&mut self, source: FileRevision) {
        self.merge_sources.push(source);
    }

    /// Merged revisions in recording order
    pub fn merge_sources(&self) -> &[FileRevision] {
        &self.merge_sources
    }

    /// Content of the file at this revision
    ///
    /// Historical revisions are served from `cache` when possible; the live
    /// head is always fetched. A peg revision, if set, is handed to the fetcher.
    pub fn content<F>(
        &self,
        cache: &RevisionContentCache,
        fetcher: &F,
    ) -> Result<Bytes, CacheError>
    where
        F: ContentFetcher + ?Sized,
    {
        let outcome = match self.peg {
            Some(peg) => cache.get(&self.key, &Pegged::new(fetcher, peg)),
            None => cache.get(&self.key, fetcher),
        };
        outcome.map_err(|e| {
            self.log_load_failure(&e);
            e
        })
    }

    /// Content of the file at this revision, loaded under an execution mode
    pub fn content_with(
        &self,
        cache: &Arc<RevisionContentCache>,
        fetcher: Arc<dyn ContentFetcher>,
        mode: &dyn ExecutionMode,
    ) -> Result<Bytes, CacheError> {
        let fetcher: Arc<dyn ContentFetcher> = match self.peg {
            Some(peg) => Arc::new(Pegged::new(fetcher, peg)),
            None => fetcher,
        };
        cache
            .get_with(&self.key, fetcher, mode)
            .map_err(|e| {
                self.log_load_failure(&e);
                e
            })
    }

    fn log_load_failure(&self, error: &CacheError) {
        if !matches!(error, CacheError::Cancelled) {
            info!(
                url = %self.key.url(),
                revision = %self.key.revision(),
                error = %error,
                "Failed to load file content"
            );
        }
    }
}
