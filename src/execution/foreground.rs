//! Foreground-blocking execution
//!
//! Runs a content lookup on the tokio blocking pool while the calling thread
//! waits for it, reporting progress as it goes. The caller can stop waiting
//! through a `CancelToken`; the lookup itself keeps running and still fills the
//! cache for later callers.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ContentTask, ExecutionMode};
use crate::cache::CacheError;
use crate::fetch::FetchError;

/// Caller-side cancellation for a foreground wait
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Stop waiting. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut changes = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = changes.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks the calling thread until the lookup completes or the wait is cancelled
///
/// Must be used from a thread that is not driving the tokio runtime (for
/// example a UI or FUSE callback thread), since it blocks on the runtime handle.
pub struct ForegroundBlocking {
    /// Runtime the lookup is spawned on
    runtime: Handle,
    /// Optional caller-side cancellation
    cancel: Option<CancelToken>,
}

impl ForegroundBlocking {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            cancel: None,
        }
    }

    /// Use the runtime of the current context
    ///
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Let the caller abandon the wait through `token`
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl ExecutionMode for ForegroundBlocking {
    fn run(&self, title: &str, task: ContentTask) -> Result<Bytes, CacheError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            debug!(title = title, "Wait cancelled before start");
            return Err(CacheError::Cancelled);
        }

        info!(title = title, "Started");
        let started = Instant::now();

        let job = self.runtime.spawn_blocking(task);
        let cancel = self.cancel.clone();

        let joined = self.runtime.block_on(async move {
            match cancel {
                Some(token) => tokio::select! {
                    joined = job => Some(joined),
                    _ = token.cancelled() => None,
                },
                None => Some(job.await),
            }
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match joined {
            Some(Ok(outcome)) => {
                info!(
                    title = title,
                    elapsed_ms = elapsed_ms,
                    ok = outcome.is_ok(),
                    "Finished"
                );
                outcome
            }
            Some(Err(e)) => {
                warn!(title = title, error = %e, "Lookup task failed");
                Err(FetchError::Aborted.into())
            }
            None => {
                info!(
                    title = title,
                    elapsed_ms = elapsed_ms,
                    "Wait cancelled, lookup continues in background"
                );
                Err(CacheError::Cancelled)
            }
        }
    }

    fn name(&self) -> &'static str {
        "foreground"
    }
}
