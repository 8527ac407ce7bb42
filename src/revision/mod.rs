//! Repository revision model

pub mod file_revision;
pub mod key;

pub use file_revision::{CommitInfo, FileRevision, LogEntry};
pub use key::{Revision, RevisionKey};
