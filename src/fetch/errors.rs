//! Fetch Error Types
//!
//! Structured errors for remote content retrieval.
//! Maps `svn` client diagnostics to specific variants for logging and retry decisions.

/// Remote fetch error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Fetch aborted before publishing a result")]
    Aborted,
}

impl FetchError {
    /// Whether a caller may reasonably try the same fetch again
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Aborted)
    }

    /// Classify a failed `svn` invocation from its stderr output
    ///
    /// Subversion prefixes diagnostics with an `svn: E<code>:` marker; the
    /// codes below are the stable ones for missing paths, authorization and
    /// connectivity failures.
    pub fn from_svn_stderr(stderr: &str) -> Self {
        let message = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("svn exited without a diagnostic")
            .to_string();

        const NOT_FOUND: &[&str] = &["E160013", "E170000", "E195012", "E200009"];
        const FORBIDDEN: &[&str] = &["E170001", "E215004", "E175013"];
        const NETWORK: &[&str] = &["E170013", "E175002", "E210002", "E670002", "E731001"];

        let has_code = |codes: &[&str]| codes.iter().any(|code| stderr.contains(code));

        if has_code(NOT_FOUND) {
            FetchError::NotFound(message)
        } else if has_code(FORBIDDEN) {
            FetchError::Forbidden(message)
        } else if has_code(NETWORK) {
            FetchError::Network(message)
        } else {
            FetchError::Client(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_svn_stderr() {
        let missing = "svn: E170000: URL 'https://x/svn/trunk/b.txt' doesn't exist\n";
        assert!(matches!(
            FetchError::from_svn_stderr(missing),
            FetchError::NotFound(msg) if msg.contains("doesn't exist")
        ));

        let denied = "svn: E170001: Authorization failed\n";
        assert!(matches!(
            FetchError::from_svn_stderr(denied),
            FetchError::Forbidden(_)
        ));

        let offline = "svn: E170013: Unable to connect to a repository at URL 'svn://x'\nsvn: E731001: Host not found\n";
        let err = FetchError::from_svn_stderr(offline);
        assert!(matches!(err, FetchError::Network(ref msg) if msg.contains("Host not found")));
        assert!(err.is_retryable());

        assert_eq!(
            FetchError::from_svn_stderr(""),
            FetchError::Client("svn exited without a diagnostic".to_string())
        );
    }
}
