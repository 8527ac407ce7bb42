//! Revision coordinates
//!
//! Identifies the content of a file at a point in repository history.
//! A key is either pinned to a concrete revision number (immutable content)
//! or to the LIVE head of the repository (content that may change at any time).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;

/// A repository revision: a concrete number or the live head
///
/// Concrete revisions order numerically; `Live` sorts after every number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Revision {
    /// Committed revision number
    Number(u64),
    /// Head of the repository, resolved by the server at fetch time
    Live,
}

impl Revision {
    /// Whether this is the live head sentinel
    pub fn is_live(&self) -> bool {
        matches!(self, Revision::Live)
    }

    /// Concrete revision number, if any
    pub fn number(&self) -> Option<u64> {
        match self {
            Revision::Number(n) => Some(*n),
            Revision::Live => None,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Number(n) => write!(f, "{}", n),
            Revision::Live => f.write_str("HEAD"),
        }
    }
}

impl FromStr for Revision {
    type Err = CacheError;

    /// Accepts `HEAD` (any case), `123` or `r123`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("head") {
            return Ok(Revision::Live);
        }

        let digits = trimmed
            .strip_prefix('r')
            .or_else(|| trimmed.strip_prefix('R'))
            .unwrap_or(trimmed);

        digits
            .parse::<u64>()
            .map(Revision::Number)
            .map_err(|_| CacheError::InvalidKey(format!("not a revision: {:?}", s)))
    }
}

/// Immutable (repository, path, revision) coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionKey {
    repository: String,
    path: String,
    revision: Revision,
}

impl RevisionKey {
    /// Build a key, normalizing the repository URL and path
    ///
    /// Fails with `InvalidKey` when either the repository or the path is empty.
    pub fn new(
        repository: impl Into<String>,
        path: impl Into<String>,
        revision: Revision,
    ) -> Result<Self, CacheError> {
        let repository = repository.into().trim().trim_end_matches('/').to_string();
        let path = normalize_path(&path.into());

        if repository.is_empty() {
            return Err(CacheError::InvalidKey("empty repository location".to_string()));
        }
        if path == "/" {
            return Err(CacheError::InvalidKey(format!(
                "empty path in repository {}",
                repository
            )));
        }

        Ok(Self {
            repository,
            path,
            revision,
        })
    }

    /// Key pinned to a concrete revision number
    pub fn at(
        repository: impl Into<String>,
        path: impl Into<String>,
        revision: u64,
    ) -> Result<Self, CacheError> {
        Self::new(repository, path, Revision::Number(revision))
    }

    /// Key for the live head of the repository
    pub fn live(repository: impl Into<String>, path: impl Into<String>) -> Result<Self, CacheError> {
        Self::new(repository, path, Revision::Live)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Path within the repository, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn is_live(&self) -> bool {
        self.revision.is_live()
    }

    /// Full URL of the file (repository location joined with the path)
    pub fn url(&self) -> String {
        format!("{}{}", self.repository, self.path)
    }

    /// URL scheme of the repository location (`svn`, `https`, `file`, ...)
    pub fn scheme(&self) -> Option<&str> {
        self.repository
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .filter(|s| !s.is_empty())
    }

    /// Same coordinate at another revision
    pub fn with_revision(&self, revision: Revision) -> Self {
        Self {
            repository: self.repository.clone(),
            path: self.path.clone(),
            revision,
        }
    }
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url(), self.revision)
    }
}

/// Collapse repeated slashes and force a single leading slash
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}
