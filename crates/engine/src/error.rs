//! Common error types for the engine crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for fallible engine entry points.
pub type EngineResult<T> = Result<T, EngineError>;

/// Fatal conditions that abort a replication run.
///
/// Everything else — per-entry I/O failures, integrity mismatches,
/// safety refusals — is summed into the run's failure count and reported
/// through the diagnostic stream instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source root could not be examined at all.
    #[error("cannot access source {}: {source}", path.display())]
    SourceRoot {
        /// The configured source root.
        path: PathBuf,
        /// The underlying host failure.
        source: hostfs::HostError,
    },
}
