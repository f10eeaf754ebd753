//! Per-directory MD5 digest cache.
//!
//! The cache file (`.MD5.CHECKSUMS` unless configured otherwise) sits in
//! the source directory it describes. Each line is
//! `<hex digest> <size> <name>`; the name runs to end of line so spaces
//! survive. A cached digest is trusted while the recorded size matches
//! the file; any other state recomputes from the source and marks the
//! cache dirty.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::io::{Read, Write as _};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hostfs::{HostFs, HostResult};
use md5::{Digest, Md5};

use crate::CheckOutcome;

struct Entry {
    digest: String,
    size: u64,
}

/// Lazily-loaded digest cache for one source directory at a time.
pub struct Md5Cache {
    cache_name: OsString,
    dir: Option<PathBuf>,
    entries: BTreeMap<Vec<u8>, Entry>,
    dirty: bool,
    /// Bytes read while computing digests, reported to the caller's
    /// counters in bulk.
    bytes_read: u64,
}

impl Md5Cache {
    /// Creates a cache using `cache_name` as the per-directory file name.
    #[must_use]
    pub fn new(cache_name: &OsStr) -> Self {
        Self {
            cache_name: cache_name.to_os_string(),
            dir: None,
            entries: BTreeMap::new(),
            dirty: false,
            bytes_read: 0,
        }
    }

    /// The configured cache file name.
    #[must_use]
    pub fn cache_name(&self) -> &OsStr {
        &self.cache_name
    }

    /// Takes the bytes-read tally accumulated since the last call.
    pub fn take_bytes_read(&mut self) -> u64 {
        std::mem::take(&mut self.bytes_read)
    }

    /// Compares source and destination content.
    ///
    /// With a destination path, both sides are digested (the source side
    /// through the cache) and compared. Without one the call refreshes
    /// the cache entry for the source file: [`CheckOutcome::Equal`] means
    /// the entry was already current, [`CheckOutcome::Different`] that it
    /// was created or updated.
    pub fn check(
        &mut self,
        src: &dyn HostFs,
        spath: &Path,
        dst: Option<(&dyn HostFs, &Path)>,
    ) -> CheckOutcome {
        let Some(dir) = spath.parent() else {
            return CheckOutcome::Unknown;
        };
        let Some(name) = spath.file_name() else {
            return CheckOutcome::Unknown;
        };
        if self.switch_dir(src, dir).is_err() {
            return CheckOutcome::Unknown;
        }

        let size = match src.lstat(spath) {
            Ok(stat) => stat.size,
            Err(_) => return CheckOutcome::Unknown,
        };

        match dst {
            Some((dst_host, dpath)) => {
                let source_digest = match self.source_digest(src, spath, name, size) {
                    Ok(digest) => digest,
                    Err(_) => return CheckOutcome::Unknown,
                };
                match self.digest_of(dst_host, dpath) {
                    Ok(dst_digest) if dst_digest == source_digest => CheckOutcome::Equal,
                    Ok(_) => CheckOutcome::Different,
                    Err(_) => CheckOutcome::Unknown,
                }
            }
            None => {
                let fresh = match self.digest_of(src, spath) {
                    Ok(digest) => digest,
                    Err(_) => return CheckOutcome::Unknown,
                };
                let key = name.as_bytes().to_vec();
                let current = self
                    .entries
                    .get(&key)
                    .is_some_and(|entry| entry.digest == fresh && entry.size == size);
                if current {
                    CheckOutcome::Equal
                } else {
                    self.entries.insert(
                        key,
                        Entry {
                            digest: fresh,
                            size,
                        },
                    );
                    self.dirty = true;
                    CheckOutcome::Different
                }
            }
        }
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
        for (name, entry) in &self.entries {
            body.extend_from_slice(entry.digest.as_bytes());
            body.extend_from_slice(format!(" {} ", entry.size).as_bytes());
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
        self.bytes_read += body.len() as u64;
        for line in body.split(|b| *b == b'\n') {
            let Some((digest, rest)) = split_field(line) else {
                continue;
            };
            let Some((size, name)) = split_field(rest) else {
                continue;
            };
            let Ok(digest) = std::str::from_utf8(digest) else {
                continue;
            };
            let Ok(size) = std::str::from_utf8(size).unwrap_or("").parse::<u64>() else {
                continue;
            };
            if digest.len() == 32 && !name.is_empty() {
                self.entries.insert(
                    name.to_vec(),
                    Entry {
                        digest: digest.to_ascii_lowercase(),
                        size,
                    },
                );
            }
        }
    }

    fn source_digest(
        &mut self,
        host: &dyn HostFs,
        path: &Path,
        name: &OsStr,
        size: u64,
    ) -> HostResult<String> {
        let key = name.as_bytes().to_vec();
        if let Some(entry) = self.entries.get(&key) {
            if entry.size == size {
                return Ok(entry.digest.clone());
            }
        }
        let digest = self.digest_of(host, path)?;
        self.entries.insert(
            key,
            Entry {
                digest: digest.clone(),
                size,
            },
        );
        self.dirty = true;
        Ok(digest)
    }

    fn digest_of(&mut self, host: &dyn HostFs, path: &Path) -> HostResult<String> {
        let mut reader = host.open_reader(path)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let got = reader.read(&mut buf)?;
            if got == 0 {
                break;
            }
            self.bytes_read += got as u64;
            hasher.update(&buf[..got]);
        }
        let mut hex = String::with_capacity(32);
        for byte in hasher.finalize() {
            let _ = write!(hex, "{byte:02x}");
        }
        Ok(hex)
    }
}

impl std::fmt::Debug for Md5Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5Cache")
            .field("cache_name", &self.cache_name)
            .field("dir", &self.dir)
            .field("entries", &self.entries.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn split_field(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = line.iter().position(|b| *b == b' ')?;
    Some((&line[..pos], &line[pos + 1..]))
}
