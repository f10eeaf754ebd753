//! Hardlink-preservation table.
//!
//! Regular files with `nlink > 1` are tracked by source inode so every
//! later sighting of the same inode becomes a hard link to wherever the
//! first copy landed. An entry counts its sightings and is retired once
//! all of the source's links have been seen, which keeps the table
//! proportional to the number of *open* hardlink groups, not the size of
//! the tree. An empty table at end of run means every group was fully
//! resolved.

use std::path::{Path, PathBuf};

use hostfs::FileStat;
use rustc_hash::FxHashMap;

/// One open hardlink group, keyed by its source inode.
#[derive(Debug)]
pub struct HardlinkEntry {
    /// Inode on the source filesystem.
    pub src_ino: u64,
    /// Inode the first copy received at the destination, once known.
    pub dst_ino: Option<u64>,
    /// Destination path of the first copy; later sightings link to it.
    pub first_path: PathBuf,
    /// Sightings so far, including the first.
    pub links_seen: u64,
}

/// Map from source inode to its open hardlink group.
#[derive(Debug, Default)]
pub struct HardlinkTable {
    entries: FxHashMap<u64, HardlinkEntry>,
}

impl HardlinkTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the open group for a source inode.
    pub fn lookup(&mut self, ino: u64) -> Option<&mut HardlinkEntry> {
        self.entries.get_mut(&ino)
    }

    /// Records the first sighting of a shared inode and the destination
    /// path its copy will land at.
    pub fn add(&mut self, stat: &FileStat, first_path: &Path) {
        self.entries.insert(
            stat.ino,
            HardlinkEntry {
                src_ino: stat.ino,
                dst_ino: None,
                first_path: first_path.to_path_buf(),
                links_seen: 1,
            },
        );
    }

    /// Records the destination inode after the first copy succeeded.
    pub fn set_dst_ino(&mut self, ino: u64, dst_ino: u64) {
        if let Some(entry) = self.entries.get_mut(&ino) {
            entry.dst_ino = Some(dst_ino);
        }
    }

    /// Retires a group.
    pub fn remove(&mut self, ino: u64) {
        self.entries.remove(&ino);
    }

    /// Number of open groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when every group has been fully resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
