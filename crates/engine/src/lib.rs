#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `engine` is the replication core: a recursive diff-and-apply driver
//! that makes a destination tree reflect a source tree while preserving
//! content, metadata (uid, gid, mode, mtime, flags), hard and symbolic
//! links, and device nodes. Changed files are replaced atomically through
//! a write-temp-then-rename sequence so live systems can be updated in
//! place; destination objects with no source counterpart are pruned.
//!
//! # Design
//!
//! The driver is deliberately single-threaded and synchronous: the
//! correctness of an in-place mirror rests on ordered, observable state
//! transitions on two filesystems, and the hardlink table is shared
//! across the entire traversal. All I/O goes through
//! [`hostfs::HostFs`], so either side may be the local OS or a remote
//! peer without the core knowing.
//!
//! Per-run state lives in [`Replicator`]; mode flags travel in
//! [`Options`]; counters in [`Stats`]. The supporting structures —
//! [`HardlinkTable`], the flag-clearing [`replace`] helpers, and the
//! pruner — each keep to one concern.
//!
//! # Errors
//!
//! Only an unreachable source root is fatal ([`EngineError`]).
//! Everything else is logged with the affected path, summed into the
//! failure count the run returns, and replication continues with the
//! next sibling.

mod error;
mod hardlink;
mod options;
mod prune;
mod replace;
mod replicate;
mod stats;

pub use error::{EngineError, EngineResult};
pub use hardlink::{HardlinkEntry, HardlinkTable};
pub use options::Options;
pub use replace::{safe_link, safe_rename};
pub use replicate::Replicator;
pub use stats::Stats;
