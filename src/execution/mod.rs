//! Execution modes
//!
//! Decide how the calling thread is suspended while content is looked up or
//! fetched. Cache semantics are identical in every mode.

pub mod foreground;

pub use foreground::{CancelToken, ForegroundBlocking};

use bytes::Bytes;
use tracing::trace;

use crate::cache::CacheError;
use crate::revision::RevisionKey;

/// A content lookup handed to an execution mode
pub type ContentTask = Box<dyn FnOnce() -> Result<Bytes, CacheError> + Send + 'static>;

/// Strategy for running a content lookup on behalf of a caller
pub trait ExecutionMode: Send + Sync {
    /// Run `task` and return its outcome; `title` describes it for progress reporting
    fn run(&self, title: &str, task: ContentTask) -> Result<Bytes, CacheError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Runs the lookup inline on the calling thread, without progress reporting
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl ExecutionMode for Direct {
    fn run(&self, title: &str, task: ContentTask) -> Result<Bytes, CacheError> {
        trace!(title = title, "Running content lookup inline");
        task()
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

static DIRECT: Direct = Direct;

/// Pick the mode for loading a key
///
/// Content from a remote repository goes through the foreground facility when
/// one is available. Local `file://` repositories are read inline, and without
/// a facility everything runs in direct mode.
pub fn select_mode<'a>(
    key: &RevisionKey,
    foreground: Option<&'a dyn ExecutionMode>,
) -> &'a dyn ExecutionMode {
    match foreground {
        Some(mode) if key.scheme() != Some("file") => mode,
        _ => &DIRECT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    impl ExecutionMode for Marker {
        fn run(&self, _title: &str, task: ContentTask) -> Result<Bytes, CacheError> {
            task()
        }

        fn name(&self) -> &'static str {
            "marker"
        }
    }

    #[test]
    fn test_direct_runs_inline() {
        let outcome = Direct.run(
            "test",
            Box::new(|| -> Result<Bytes, CacheError> { Ok(Bytes::from_static(b"x")) }),
        );
        assert_eq!(outcome.unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_select_mode() {
        let remote = RevisionKey::at("https://x/svn", "/a", 1).unwrap();
        let local = RevisionKey::at("file:///var/repos/x", "/a", 1).unwrap();
        let marker = Marker;

        assert_eq!(select_mode(&remote, Some(&marker)).name(), "marker");
        assert_eq!(select_mode(&local, Some(&marker)).name(), "direct");
        assert_eq!(select_mode(&remote, None).name(), "direct");
    }
}
