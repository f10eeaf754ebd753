//! Run-wide configuration.
//!
//! Every mode flag travels in one context struct handed to the
//! replicator, so a library caller can run several differently-configured
//! mirrors in one process without touching global state.

use std::ffi::OsString;
use std::path::PathBuf;

/// Mode flags and collaborator configuration for one replication run.
#[derive(Clone, Debug)]
pub struct Options {
    /// Compare and copy content even when metadata agrees.
    pub force: bool,
    /// Refuse to replace a destination directory with a non-directory.
    pub safety: bool,
    /// Prompt on standard error before each deletion.
    pub ask_confirmation: bool,
    /// Never delete anything at the destination.
    pub no_remove: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Per-file logging threshold (0 = errors only).
    pub verbose: i32,
    /// Name of the per-directory exclusion file, when enabled.
    pub ignore_file: Option<OsString>,
    /// Name of the per-directory digest cache, when digest checking is
    /// enabled.
    pub md5_cache_file: Option<OsString>,
    /// Name of the per-directory content-id cache, when content-id
    /// checking is enabled.
    pub fsmid_cache_file: Option<OsString>,
    /// Prior-snapshot root for incremental backups.
    pub hardlink_base: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            force: false,
            safety: true,
            ask_confirmation: true,
            no_remove: false,
            quiet: false,
            verbose: 0,
            ignore_file: None,
            md5_cache_file: None,
            fsmid_cache_file: None,
            hardlink_base: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_the_safety_rails_on() {
        let options = Options::default();
        assert!(options.safety);
        assert!(options.ask_confirmation);
        assert!(!options.force);
        assert!(!options.no_remove);
    }
}
