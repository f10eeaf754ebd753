#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `checksums` supplies the two optional content-identity channels the
//! replication core can consult when file metadata alone is not trusted:
//!
//! - [`Md5Cache`] — MD5 digests of source files, cached per source
//!   directory so repeated runs do not re-read unchanged content. The
//!   destination file is digested on every check; the cache only spares
//!   the source side.
//! - [`FsmidCache`] — filesystem-assigned content ids, cached per
//!   destination directory. Platforms that record no such id leave the
//!   check in the unknown state.
//!
//! Both caches are plain line-oriented text files living inside the tree
//! they describe, loaded lazily for one directory at a time and flushed
//! when the walk moves on. All file access goes through
//! [`HostFs`](hostfs::HostFs) so the caches behave the same on any host
//! the caller hands them.

mod fsmid;
mod md5_cache;

pub use fsmid::FsmidCache;
pub use md5_cache::Md5Cache;

/// Result of a content-identity comparison.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckOutcome {
    /// Both sides have the same content identity.
    Equal,
    /// The identities differ; the file must be copied.
    Different,
    /// No determination could be made (missing id, unreadable file).
    Unknown,
}

impl CheckOutcome {
    /// Returns `true` only for a positive match.
    #[must_use]
    pub const fn is_equal(self) -> bool {
        matches!(self, Self::Equal)
    }
}
