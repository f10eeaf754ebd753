#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `filters` implements the exclusion machinery of the replication walk:
//! the two-character shell glob dialect (`?`, `*`) used by per-directory
//! ignore files, and the [`IgnoreList`] that folds ignore patterns,
//! source names, and destination names into one tagged index so the prune
//! pass can run in a single sweep over the destination listing.
//!
//! Patterns and names are raw bytes throughout; file names are not
//! required to be UTF-8.

mod ignore;
mod wildmatch;

pub use ignore::{IgnoreList, Origin, WILDCARD_BYTES, ignore_file_patterns, is_wildcard};
pub use wildmatch::wild_match;
