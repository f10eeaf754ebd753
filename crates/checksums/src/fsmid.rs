//! Per-directory filesystem-content-id cache.
//!
//! A filesystem content id is an opaque per-inode value the filesystem
//! changes whenever the object's content (or, for directories, any
//! child's content) changes, which makes it an O(1) subtree-skip signal.
//! The cache file (`.FSMID.CHECK` unless configured otherwise) lives in
//! the destination directory; each line is `<id> <name>`.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io::{Read, Write as _};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hostfs::{HostFs, HostResult};

use crate::CheckOutcome;

/// Lazily-loaded content-id cache for one destination directory at a time.
pub struct FsmidCache {
    cache_name: OsString,
    dir: Option<PathBuf>,
    entries: BTreeMap<Vec<u8>, u64>,
    dirty: bool,
}

impl FsmidCache {
    /// Creates a cache using `cache_name` as the per-directory file name.
    #[must_use]
    pub fn new(cache_name: &OsStr) -> Self {
        Self {
            cache_name: cache_name.to_os_string(),
            dir: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// The configured cache file name.
    #[must_use]
    pub fn cache_name(&self) -> &OsStr {
        &self.cache_name
    }

    /// Compares the source's content id against the cached value for the
    /// destination path.
    ///
    /// A match is [`CheckOutcome::Equal`]. On any other id the cache is
    /// updated (dirty) and the result is [`CheckOutcome::Different`], so
    /// the next run sees the new id as current. Without a platform id the
    /// result is [`CheckOutcome::Unknown`].
    pub fn check(
        &mut self,
        host: &dyn HostFs,
        fsmid: Option<u64>,
        dpath: &Path,
    ) -> CheckOutcome {
        let Some(fsmid) = fsmid else {
            return CheckOutcome::Unknown;
        };
        let Some(dir) = dpath.parent() else {
            return CheckOutcome::Unknown;
        };
        let Some(name) = dpath.file_name() else {
            return CheckOutcome::Unknown;
        };
        if self.switch_dir(host, dir).is_err() {
            return CheckOutcome::Unknown;
        }

        let key = name.as_bytes().to_vec();
        if self.entries.get(&key) == Some(&fsmid) {
            return CheckOutcome::Equal;
        }
        self.entries.insert(key, fsmid);
        self.dirty = true;
        CheckOutcome::Different
    }

    /// Writes the cache back out if anything changed.
    pub fn flush(&mut self, host: &dyn HostFs) -> HostResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        let path = dir.join(&self.cache_name);
        let mut body = Vec::new();
        for (name, fsmid) in &self.entries {
            body.extend_from_slice(format!("{fsmid} ").as_bytes());
            body.extend_from_slice(name);
            body.push(b'\n');
        }
        let _ = host.remove(&path);
        let mut writer = host.create_writer(&path, 0o644)?;
        writer.write_all(&body)?;
        self.dirty = false;
        Ok(())
    }

    fn switch_dir(&mut self, host: &dyn HostFs, dir: &Path) -> HostResult<()> {
        if self.dir.as_deref() == Some(dir) {
            return Ok(());
        }
        self.flush(host)?;
        self.entries.clear();
        self.dir = Some(dir.to_path_buf());
        self.load(host, dir);
        Ok(())
    }

    fn load(&mut self, host: &dyn HostFs, dir: &Path) {
        let path = dir.join(&self.cache_name);
        let Ok(mut reader) = host.open_reader(&path) else {
            return;
        };
        let mut body = Vec::new();
        if reader.read_to_end(&mut body).is_err() {
            return;
        }
        for line in body.split(|b| *b == b'\n') {
            let Some(pos) = line.iter().position(|b| *b == b' ') else {
                continue;
            };
            let Ok(fsmid) = std::str::from_utf8(&line[..pos]).unwrap_or("").parse::<u64>() else {
                continue;
            };
            let name = &line[pos + 1..];
            if !name.is_empty() {
                self.entries.insert(name.to_vec(), fsmid);
            }
        }
    }
}

impl std::fmt::Debug for FsmidCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmidCache")
            .field("cache_name", &self.cache_name)
            .field("dir", &self.dir)
            .field("entries", &self.entries.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
