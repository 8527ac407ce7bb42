//! Subversion content fetcher
//!
//! Retrieves file content by running the `svn` command-line client.
//! Protocol handling, authentication and proxies are left to the client.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, warn};

use super::{ContentFetcher, FetchError};
use crate::revision::{Revision, RevisionKey};

/// Fetches content with `svn cat`
#[derive(Debug, Clone)]
pub struct SvnCliFetcher {
    /// Path or name of the `svn` executable
    program: PathBuf,
    /// Default peg revision appended to the URL (`url@peg`), if any
    peg: Option<Revision>,
    /// Extra global options (e.g. `--username`, `--config-dir`)
    extra_args: Vec<OsString>,
}

impl SvnCliFetcher {
    /// Fetcher using the `svn` found on `PATH`
    pub fn new() -> Self {
        Self::with_program("svn")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            peg: None,
            extra_args: Vec::new(),
        }
    }

    /// Resolve URLs at a peg revision unless a fetch names its own
    pub fn peg_revision(mut self, peg: Revision) -> Self {
        self.peg = Some(peg);
        self
    }

    /// Append a global option passed on every invocation
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Arguments for `svn cat` of the given key
    fn cat_args(&self, key: &RevisionKey, peg: Option<Revision>) -> Vec<OsString> {
        let target = match peg.or(self.peg) {
            Some(peg) => format!("{}@{}", key.url(), peg),
            // A trailing `@` stops svn from reading `@` inside the path as a peg marker
            None => format!("{}@", key.url()),
        };

        let mut args: Vec<OsString> = vec![
            "cat".into(),
            "--non-interactive".into(),
            "-r".into(),
            key.revision().to_string().into(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(target.into());
        args
    }
}

impl Default for SvnCliFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SvnCliFetcher {
    fn run_cat(&self, key: &RevisionKey, peg: Option<Revision>) -> Result<Vec<u8>, FetchError> {
        debug!(key = %key, peg = ?peg, program = %self.program.display(), "Running svn cat");

        let output = Command::new(&self.program)
            .args(self.cat_args(key, peg))
            .output()
            .map_err(|e| {
                FetchError::Client(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if output.status.success() {
            debug!(key = %key, size = output.stdout.len(), "svn cat succeeded");
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let error = FetchError::from_svn_stderr(&stderr);
        warn!(key = %key, status = ?output.status.code(), error = %error, "svn cat failed");
        Err(error)
    }
}

impl ContentFetcher for SvnCliFetcher {
    fn fetch(&self, key: &RevisionKey) -> Result<Vec<u8>, FetchError> {
        self.run_cat(key, None)
    }

    fn fetch_at_peg(&self, key: &RevisionKey, peg: Revision) -> Result<Vec<u8>, FetchError> {
        self.run_cat(key, Some(peg))
    }
}
