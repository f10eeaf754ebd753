//! The recursive diff-and-apply driver.
//!
//! [`Replicator::run`] walks the source tree depth-first, deciding per
//! object between "no change", "copy", "relink", "prune", and "recurse",
//! and applying the result through the two host handles. Regular files
//! are staged to `<dst>.tmp` and renamed over the original so a reader
//! never observes a partial file. Failures are summed, not thrown: a
//! subtree's count bubbles up and the run keeps going with the next
//! sibling.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use checksums::{CheckOutcome, FsmidCache, Md5Cache};
use filters::{IgnoreList, Origin, ignore_file_patterns};
use hostfs::{FileKind, FileStat, HostFs};
use logging::Reporter;

use crate::error::{EngineError, EngineResult};
use crate::hardlink::HardlinkTable;
use crate::options::Options;
use crate::replace::{safe_link, safe_rename};
use crate::stats::Stats;

const COPY_CHUNK: usize = 64 * 1024;

/// Outcome of the hardlink probe for a shared source inode.
enum HardlinkProbe {
    /// Not a shared inode, or no destination to link at.
    NotShared,
    /// Destination already refers to the right inode; nothing to do.
    Done,
    /// Linking failed hard; the failure has been logged.
    Failed,
    /// Proceed with a normal copy. `true` when this path is the group's
    /// first copy and the table should learn its destination inode.
    CopyNeeded(bool),
}

/// The replication engine for one run.
///
/// Owns the hardlink table, the counters, and the optional
/// content-identity caches; borrows the two host handles and the
/// diagnostic reporter.
pub struct Replicator<'a> {
    src: &'a dyn HostFs,
    pub(crate) dst: &'a dyn HostFs,
    pub(crate) options: &'a Options,
    pub(crate) reporter: &'a mut Reporter,
    pub(crate) stats: Stats,
    hardlinks: HardlinkTable,
    md5: Option<Md5Cache>,
    fsmid: Option<FsmidCache>,
    dst_root: PathBuf,
}

impl<'a> Replicator<'a> {
    /// Builds a replicator from the run configuration.
    pub fn new(
        src: &'a dyn HostFs,
        dst: &'a dyn HostFs,
        options: &'a Options,
        reporter: &'a mut Reporter,
    ) -> Self {
        Self {
            src,
            dst,
            options,
            reporter,
            stats: Stats::default(),
            hardlinks: HardlinkTable::new(),
            md5: options.md5_cache_file.as_deref().map(Md5Cache::new),
            fsmid: options.fsmid_cache_file.as_deref().map(FsmidCache::new),
            dst_root: PathBuf::new(),
        }
    }

    /// Accumulated counters.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Hardlink groups still awaiting sightings. Zero after a complete
    /// run.
    #[must_use]
    pub fn open_hardlink_groups(&self) -> usize {
        self.hardlinks.len()
    }

    /// Mirrors `spath` onto `dpath`, or refreshes the digest cache when
    /// no destination is given.
    ///
    /// Returns the number of non-fatal failures; zero means the
    /// destination now reflects the source.
    pub fn run(&mut self, spath: &Path, dpath: Option<&Path>) -> EngineResult<u64> {
        self.src
            .lstat(spath)
            .map_err(|source| EngineError::SourceRoot {
                path: spath.to_path_buf(),
                source,
            })?;
        self.dst_root = dpath.map(Path::to_path_buf).unwrap_or_default();

        let failures = self.replicate(spath, dpath, None, None);

        let src = self.src;
        if let Some(md5) = &mut self.md5 {
            if let Err(error) = md5.flush(src) {
                self.reporter
                    .error_line(format!("digest cache flush failed: {error}"));
            }
            self.stats.read_bytes += md5.take_bytes_read();
        }
        let dst = self.dst;
        if let Some(fsmid) = &mut self.fsmid {
            if let Err(error) = fsmid.flush(dst) {
                self.reporter
                    .error_line(format!("fsmid cache flush failed: {error}"));
            }
        }
        Ok(failures)
    }

    fn replicate(
        &mut self,
        spath: &Path,
        dpath: Option<&Path>,
        sdev: Option<u64>,
        ddev: Option<u64>,
    ) -> u64 {
        // The parent enumerated this entry, but it may be gone by now.
        let Ok(st1) = self.src.lstat(spath) else {
            return 0;
        };
        let st2 = dpath.and_then(|dpath| self.dst.lstat(dpath).ok());
        let size = if st1.kind() == FileKind::Regular {
            st1.block_size()
        } else {
            0
        };

        let mut first_of_group = false;
        if st1.kind() == FileKind::Regular && st1.nlink > 1 {
            if let Some(dpath) = dpath {
                match self.probe_hardlink(spath, dpath, &st1, st2.as_ref()) {
                    HardlinkProbe::NotShared => {}
                    HardlinkProbe::Done => return 0,
                    HardlinkProbe::Failed => return 1,
                    HardlinkProbe::CopyNeeded(first) => first_of_group = first,
                }
            }
        }

        let mut md5_failed = false;
        let mut fsmid_failed = false;
        if let Some(st2v) = &st2 {
            if st1.mode == st2v.mode && st1.flags_or_zero() == st2v.flags_or_zero() {
                match st1.kind() {
                    FileKind::Symlink | FileKind::Directory => {
                        // A matching content id lets us skip the whole
                        // subtree (or link) without recursing.
                        if !self.options.force {
                            if let Some(outcome) =
                                self.fsmid_check(st1.fsmid, dpath)
                            {
                                if outcome.is_equal() {
                                    self.file_event(3, spath, dpath, "fsmid-nochange");
                                    return 0;
                                }
                                fsmid_failed = outcome == CheckOutcome::Different;
                            }
                        }
                    }
                    FileKind::Regular => {
                        if !self.options.force
                            && st1.size == st2v.size
                            && st1.uid == st2v.uid
                            && st1.gid == st2v.gid
                            && st1.mtime == st2v.mtime
                        {
                            let md5_ok = match self.md5_check(spath, dpath) {
                                None => true,
                                Some(outcome) => {
                                    md5_failed = outcome == CheckOutcome::Different;
                                    outcome.is_equal()
                                }
                            };
                            let fsmid_ok = md5_ok
                                && match self.fsmid_check(st1.fsmid, dpath) {
                                    None => true,
                                    Some(outcome) => {
                                        fsmid_failed = outcome == CheckOutcome::Different;
                                        outcome.is_equal()
                                    }
                                };
                            if md5_ok && fsmid_ok {
                                if first_of_group {
                                    self.hardlinks.set_dst_ino(st1.ino, st2v.ino);
                                }
                                let label = if self.md5.is_some() {
                                    "md5-nochange"
                                } else if self.fsmid.is_some() {
                                    "fsmid-nochange"
                                } else {
                                    "nochange"
                                };
                                self.file_event(3, spath, dpath, label);
                                self.stats.source_bytes += size;
                                self.stats.source_items += 1;
                                return 0;
                            }
                        }
                    }
                    // Devices and other kinds do their own comparison in
                    // the dispatch below.
                    _ => {}
                }
            }
        }

        let mut failures = 0u64;
        if let Some(st2v) = &st2 {
            if st1.kind() != FileKind::Directory && st2v.kind() == FileKind::Directory {
                if self.options.safety {
                    self.error_event(
                        spath,
                        dpath,
                        "SAFETY - refusing to copy file over directory",
                    );
                    return failures + 1;
                }
                if !self.options.quiet || self.options.ask_confirmation {
                    self.file_event(
                        0,
                        spath,
                        dpath,
                        "WARNING: non-directory source will blow away preexisting dest directory, continuing anyway!",
                    );
                }
                if let Some(dpath) = dpath {
                    self.prune(dpath, ddev);
                }
            }
        }

        match st1.kind() {
            FileKind::Directory => {
                // The root frame itself is not an item; children are.
                if sdev.is_some() {
                    self.stats.source_items += 1;
                }
                failures += self.sync_directory(spath, dpath, &st1, st2, sdev, ddev, fsmid_failed);
            }
            _ if dpath.is_none() => {
                self.refresh_digest(spath, &st1);
            }
            FileKind::Regular => {
                failures += self.copy_regular(
                    spath,
                    dpath.expect("checked above"),
                    &st1,
                    st2.as_ref(),
                    size,
                    md5_failed,
                    fsmid_failed,
                    first_of_group,
                );
            }
            FileKind::Symlink => {
                failures += self.sync_symlink(spath, dpath.expect("checked above"), &st1, st2.as_ref());
            }
            FileKind::BlockDev | FileKind::CharDev => {
                failures += self.sync_device(spath, dpath.expect("checked above"), &st1, st2.as_ref());
            }
            FileKind::Other => {
                self.stats.source_items += 1;
            }
        }
        failures
    }

    /// Handles a sighting of a shared source inode.
    fn probe_hardlink(
        &mut self,
        spath: &Path,
        dpath: &Path,
        st1: &FileStat,
        st2: Option<&FileStat>,
    ) -> HardlinkProbe {
        let seen = match self.hardlinks.lookup(st1.ino) {
            Some(entry) => {
                entry.links_seen += 1;
                Some((entry.links_seen, entry.first_path.clone(), entry.dst_ino))
            }
            None => None,
        };
        let Some((links_seen, first_path, dst_ino)) = seen else {
            // First sighting: copy normally and remember where it lands.
            self.hardlinks.add(st1, dpath);
            return HardlinkProbe::CopyNeeded(true);
        };

        if let Some(st2) = st2 {
            if Some(st2.ino) == dst_ino {
                // Already linked to the right inode.
                self.file_event(3, spath, Some(dpath), "nochange");
                if links_seen == st1.nlink {
                    self.hardlinks.remove(st1.ino);
                }
                self.stats.source_items += 1;
                return HardlinkProbe::Done;
            }
            if self.dst.remove(dpath).is_err() {
                self.error_event(spath, Some(dpath), "hardlink: unable to unlink");
                self.hardlinks.remove(st1.ino);
                return HardlinkProbe::Failed;
            }
        }

        match safe_link(self.dst, &first_path, dpath, st1.flags_or_zero()) {
            Ok(()) => {
                if links_seen == st1.nlink {
                    self.hardlinks.remove(st1.ino);
                }
                let label = if st2.is_some() {
                    "hardlink: relinked"
                } else {
                    "hardlink: linked"
                };
                self.file_event(1, spath, Some(dpath), label);
                self.stats.source_items += 1;
                self.stats.copied_items += 1;
                HardlinkProbe::Done
            }
            Err(error) => {
                let link_limit = error.is_link_limit();
                self.error_event(
                    spath,
                    Some(dpath),
                    format!(
                        "hardlink: unable to link to {}: {error}",
                        first_path.display()
                    ),
                );
                self.hardlinks.remove(st1.ino);
                if link_limit {
                    // The filesystem refused another link; fall back to
                    // an independent copy that restarts the group here.
                    self.error_event(spath, Some(dpath), "hardlink: will attempt to copy normally");
                    self.hardlinks.add(st1, dpath);
                    HardlinkProbe::CopyNeeded(true)
                } else {
                    HardlinkProbe::Failed
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sync_directory(
        &mut self,
        spath: &Path,
        dpath: Option<&Path>,
        st1: &FileStat,
        st2: Option<FileStat>,
        sdev: Option<u64>,
        ddev: Option<u64>,
        fsmid_failed: bool,
    ) -> u64 {
        if fsmid_failed {
            self.reporter
                .error_line(format!("{:<32}/ fsmid-CHECK-FAILED", spath.display()));
        }

        // Nothing happens for a directory we cannot enumerate.
        let Ok(names) = self.src.read_dir(spath) else {
            return 0;
        };

        let mut failures = 0u64;
        let mut no_loop = false;
        let dst_was_valid = st2.is_some();
        let mut dcur = st2;

        if let Some(dpath) = dpath {
            if dcur.as_ref().map(FileStat::kind) != Some(FileKind::Directory) {
                let _ = self.dst.remove(dpath);
                // The extra 0700 guarantees we can traverse into the new
                // directory; the real mode is restored on the way out.
                if let Err(error) = self.dst.mkdir(dpath, st1.perms() | 0o700) {
                    self.error_event(spath, Some(dpath), format!("mkdir failed: {error}"));
                    failures += 1;
                    no_loop = true;
                }
                dcur = self.dst.lstat(dpath).ok();
                let _ = self.dst.chown(dpath, st1.uid, st1.gid);
            } else if let Some(dcur) = &mut dcur {
                if dcur.perms() & 0o700 != 0o700 {
                    let _ = self.dst.chmod(dpath, dcur.perms() | 0o700);
                    dcur.mode |= 0o700;
                } else if self.reporter.verbosity().at_least(2) {
                    let display = dpath.display().to_string();
                    self.reporter.info(display);
                }
            }
        }

        // Never descend across a mount point, on either side.
        let sdev = match sdev {
            Some(dev) if st1.dev != dev => {
                no_loop = true;
                Some(dev)
            }
            Some(dev) => Some(dev),
            None => Some(st1.dev),
        };
        let dst_dev = dcur.as_ref().map_or(0, |stat| stat.dev);
        let ddev = match ddev {
            Some(dev) if dst_dev != dev => {
                no_loop = true;
                Some(dev)
            }
            Some(dev) => Some(dev),
            None => Some(dst_dev),
        };

        let mut ignore = IgnoreList::new();
        self.load_ignore_list(&mut ignore, spath);

        if !no_loop {
            for name in &names {
                if ignore.probe(name.as_bytes(), Origin::Source) == Origin::IgnoreFile {
                    continue;
                }
                let nspath = spath.join(name);
                let ndpath = dpath.map(|dpath| dpath.join(name));
                failures += self.replicate(&nspath, ndpath.as_deref(), sdev, ddev);
            }
        }

        if let Some(dpath) = dpath {
            if !no_loop {
                if let Ok(dst_names) = self.dst.read_dir(dpath) {
                    for name in dst_names {
                        if ignore.probe(name.as_bytes(), Origin::Destination)
                            == Origin::Destination
                        {
                            self.prune(&dpath.join(&name), ddev);
                        }
                    }
                }
            }

            if self.options.force
                || !dst_was_valid
                || dcur.as_ref().is_some_and(|dcur| {
                    st1.uid != dcur.uid || st1.gid != dcur.gid
                })
            {
                let _ = self.dst.chown(dpath, st1.uid, st1.gid);
            }
            if !dst_was_valid || dcur.as_ref().is_some_and(|dcur| st1.mode != dcur.mode) {
                let _ = self.dst.chmod(dpath, st1.perms());
            }
            if !dst_was_valid
                || dcur
                    .as_ref()
                    .is_some_and(|dcur| st1.flags_or_zero() != dcur.flags_or_zero())
            {
                let _ = self.dst.chflags(dpath, st1.flags_or_zero());
            }
        }
        failures
    }

    fn load_ignore_list(&mut self, ignore: &mut IgnoreList, spath: &Path) {
        if let Some(ignore_name) = &self.options.ignore_file {
            let fpath = if Path::new(ignore_name).is_absolute() {
                PathBuf::from(ignore_name)
            } else {
                spath.join(ignore_name)
            };
            if let Some(basename) = fpath.file_name() {
                // The ignore file itself is never mirrored.
                ignore.probe(basename.as_bytes(), Origin::IgnoreFile);
            }
            if let Ok(mut reader) = self.src.open_reader(&fpath) {
                let mut body = Vec::new();
                if reader.read_to_end(&mut body).is_ok() {
                    self.stats.read_bytes += body.len() as u64;
                    for pattern in ignore_file_patterns(&body) {
                        ignore.probe(pattern, Origin::IgnoreFile);
                    }
                }
            }
        }
        // The caches we maintain must not be copied over or pruned away.
        if let Some(md5) = &self.md5 {
            ignore.probe(md5.cache_name().as_bytes(), Origin::IgnoreFile);
        }
        if let Some(fsmid) = &self.fsmid {
            ignore.probe(fsmid.cache_name().as_bytes(), Origin::IgnoreFile);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_regular(
        &mut self,
        spath: &Path,
        dpath: &Path,
        st1: &FileStat,
        st2: Option<&FileStat>,
        size: u64,
        md5_failed: bool,
        fsmid_failed: bool,
        first_of_group: bool,
    ) -> u64 {
        if md5_failed {
            self.error_event(spath, Some(dpath), "md5-CHECK-FAILED");
        } else if fsmid_failed {
            self.error_event(spath, Some(dpath), "fsmid-CHECK-FAILED");
        }

        let failures = self.copy_regular_inner(spath, dpath, st1, st2, size);

        if first_of_group {
            if failures == 0 {
                if let Ok(stat) = self.dst.stat(dpath) {
                    self.hardlinks.set_dst_ino(st1.ino, stat.ino);
                    return failures;
                }
            }
            self.hardlinks.remove(st1.ino);
        }
        failures
    }

    fn copy_regular_inner(
        &mut self,
        spath: &Path,
        dpath: &Path,
        st1: &FileStat,
        st2: Option<&FileStat>,
        size: u64,
    ) -> u64 {
        // Incremental backup: an unchanged file in the prior snapshot is
        // linked, not copied.
        if let Some(hl_path) = self.check_hardlink_base(spath, st1, dpath) {
            if self.dst.hardlink(&hl_path, dpath).is_ok() {
                self.file_event(1, spath, Some(dpath), "hardlinked(-H)");
                return 0;
            }
            // Probably a link-count limit; copy instead.
        }

        let tmp = tmp_path(dpath);

        let mut reader = match self.src.open_reader(spath) {
            Ok(reader) => reader,
            Err(error) => {
                self.error_event(spath, Some(dpath), format!("copy: open failed: {error}"));
                return 1;
            }
        };

        let mut writer = match self.dst.create_writer(&tmp, 0o600) {
            Ok(writer) => writer,
            Err(_) => {
                // A stale temp from an interrupted run may be in the way,
                // possibly flag-protected.
                let _ = self.dst.chflags(&tmp, 0);
                let _ = self.dst.remove(&tmp);
                match self.dst.create_writer(&tmp, 0o600) {
                    Ok(writer) => writer,
                    Err(error) => {
                        self.error_event(spath, Some(dpath), format!("create failed: {error}"));
                        return 1;
                    }
                }
            }
        };

        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let got = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(got) => got,
                Err(error) => {
                    drop(writer);
                    self.error_event(spath, Some(dpath), format!("read failed: {error}"));
                    let _ = self.dst.remove(&tmp);
                    return 1;
                }
            };
            if let Err(error) = writer.write_all(&buf[..got]) {
                drop(writer);
                self.error_event(spath, Some(dpath), format!("write failed: {error}"));
                let _ = self.dst.remove(&tmp);
                return 1;
            }
        }
        drop(writer);

        // Metadata before the rename; flags after, because an immutable
        // flag would make the rename itself impossible.
        let _ = self.dst.set_times(&tmp, st1.mtime);
        let _ = self.dst.chown(&tmp, st1.uid, st1.gid);
        let _ = self.dst.chmod(&tmp, st1.perms());

        let mut failures = 0u64;
        let to_flags = st2.map_or(0, FileStat::flags_or_zero);
        if let Err(error) = safe_rename(self.dst, &tmp, dpath, to_flags) {
            self.error_event(spath, Some(dpath), format!("rename-after-copy failed: {error}"));
            failures += 1;
        } else {
            self.file_event(1, spath, Some(dpath), "copy-ok");
            if st1.flags_or_zero() != 0 {
                let _ = self.dst.chflags(dpath, st1.flags_or_zero());
            }
        }
        self.stats.read_bytes += size;
        self.stats.written_bytes += size;
        self.stats.source_bytes += size;
        self.stats.source_items += 1;
        self.stats.copied_items += 1;
        failures
    }

    /// Returns the prior-snapshot path when its stat (and, under
    /// `force`, its content) matches the source file.
    fn check_hardlink_base(&mut self, spath: &Path, st1: &FileStat, dpath: &Path) -> Option<PathBuf> {
        let base = self.options.hardlink_base.as_deref()?;
        let relative = dpath.strip_prefix(&self.dst_root).ok()?;
        let hl_path = base.join(relative);

        let sthl = self.dst.stat(&hl_path).ok()?;
        if st1.size != sthl.size
            || st1.uid != sthl.uid
            || st1.gid != sthl.gid
            || st1.mtime != sthl.mtime
        {
            return None;
        }

        if self.options.force && !self.contents_equal(spath, &hl_path) {
            return None;
        }
        Some(hl_path)
    }

    fn contents_equal(&mut self, spath: &Path, hl_path: &Path) -> bool {
        let Ok(mut a) = self.src.open_reader(spath) else {
            return false;
        };
        let Ok(mut b) = self.dst.open_reader(hl_path) else {
            return false;
        };
        let mut buf_a = vec![0u8; COPY_CHUNK];
        let mut buf_b = vec![0u8; COPY_CHUNK];
        loop {
            let got = match a.read(&mut buf_a) {
                Ok(got) => got,
                Err(_) => return false,
            };
            self.stats.read_bytes += got as u64;
            if got == 0 {
                // Source exhausted; the other side must be at EOF too.
                return matches!(b.read(&mut buf_b), Ok(0));
            }
            let mut filled = 0;
            while filled < got {
                match b.read(&mut buf_b[filled..got]) {
                    Ok(0) => return false,
                    Ok(more) => filled += more,
                    Err(_) => return false,
                }
            }
            self.stats.read_bytes += filled as u64;
            if buf_a[..got] != buf_b[..got] {
                return false;
            }
        }
    }

    fn sync_symlink(
        &mut self,
        spath: &Path,
        dpath: &Path,
        st1: &FileStat,
        st2: Option<&FileStat>,
    ) -> u64 {
        let target = match self.src.read_link(spath) {
            Ok(target) => target,
            Err(_) => {
                self.error_event(spath, Some(dpath), "softlink-failed");
                return 1;
            }
        };
        let existing = self.dst.read_link(dpath).ok();
        let target_len = target.as_os_str().as_bytes().len() as u64;
        let existing_len = existing
            .as_ref()
            .map_or(0, |existing| existing.as_os_str().as_bytes().len() as u64);

        let mut failures = 0u64;
        if self.options.force || existing.as_deref() != Some(target.as_path()) {
            let tmp = tmp_path(dpath);
            // The link's recorded permissions come from the creating
            // process's umask; shape it to the source mode.
            let previous_umask = self
                .dst
                .set_umask(!st1.mode & 0o7777)
                .unwrap_or(0o022);
            let _ = self.dst.remove(&tmp);
            match self.dst.symlink(&target, &tmp) {
                Err(error) => {
                    self.error_event(
                        spath,
                        Some(dpath),
                        format!("symlink ({} -> {}) failed: {error}", target.display(), tmp.display()),
                    );
                    failures += 1;
                }
                Ok(()) => {
                    let _ = self.dst.lchown(&tmp, st1.uid, st1.gid);
                    // No lchmod or lchflags exists; the link keeps
                    // whatever the umask produced.
                    let to_flags = st2.map_or(0, FileStat::flags_or_zero);
                    if let Err(error) = safe_rename(self.dst, &tmp, dpath, to_flags) {
                        self.error_event(
                            spath,
                            Some(dpath),
                            format!("rename softlink failed: {error}"),
                        );
                    } else {
                        self.file_event(1, spath, Some(dpath), "softlink-ok");
                    }
                    self.stats.written_bytes += target_len;
                    self.stats.copied_items += 1;
                }
            }
            let _ = self.dst.set_umask(previous_umask);
        } else {
            self.file_event(3, spath, Some(dpath), "nochange");
        }
        self.stats.source_bytes += target_len;
        self.stats.read_bytes += target_len + existing_len;
        self.stats.source_items += 1;
        failures
    }

    fn sync_device(
        &mut self,
        spath: &Path,
        dpath: &Path,
        st1: &FileStat,
        st2: Option<&FileStat>,
    ) -> u64 {
        let unchanged = st2.is_some_and(|st2| {
            st1.mode == st2.mode
                && st1.rdev == st2.rdev
                && st1.uid == st2.uid
                && st1.gid == st2.gid
        });

        let mut failures = 0u64;
        if self.options.force || !unchanged {
            let tmp = tmp_path(dpath);
            let _ = self.dst.remove(&tmp);
            match self.dst.mknod(&tmp, st1.mode, st1.rdev) {
                Ok(()) => {
                    let _ = self.dst.chmod(&tmp, st1.perms());
                    let _ = self.dst.chown(&tmp, st1.uid, st1.gid);
                    let _ = self.dst.remove(dpath);
                    let to_flags = st2.map_or(0, FileStat::flags_or_zero);
                    if let Err(error) = safe_rename(self.dst, &tmp, dpath, to_flags) {
                        self.error_event(
                            spath,
                            Some(dpath),
                            format!("dev-rename-after-create failed: {error}"),
                        );
                    } else {
                        self.file_event(1, spath, Some(dpath), "dev-ok");
                    }
                    self.stats.copied_items += 1;
                }
                Err(error) => {
                    self.error_event(spath, Some(dpath), format!("dev failed: {error}"));
                    failures += 1;
                }
            }
        } else {
            self.file_event(3, spath, Some(dpath), "nochange");
        }
        self.stats.source_items += 1;
        failures
    }

    /// Destination-less run: bring the digest cache up to date.
    fn refresh_digest(&mut self, spath: &Path, st1: &FileStat) {
        if st1.kind() != FileKind::Regular {
            return;
        }
        let src = self.src;
        let Some(md5) = &mut self.md5 else {
            return;
        };
        let outcome = md5.check(src, spath, None);
        let updated = outcome == CheckOutcome::Different;
        if self.reporter.verbosity().at_least(2) {
            let label = if updated { "md5-update" } else { "md5-ok" };
            self.reporter.file_event(2, spath, label);
        } else if !self.options.quiet && updated {
            self.reporter.file_event(0, spath, "md5-update");
        }
    }

    fn md5_check(&mut self, spath: &Path, dpath: Option<&Path>) -> Option<CheckOutcome> {
        let src = self.src;
        let dst = self.dst;
        let md5 = self.md5.as_mut()?;
        let dpath = dpath?;
        Some(md5.check(src, spath, Some((dst, dpath))))
    }

    fn fsmid_check(&mut self, fsmid: Option<u64>, dpath: Option<&Path>) -> Option<CheckOutcome> {
        let dst = self.dst;
        let cache = self.fsmid.as_mut()?;
        let dpath = dpath?;
        Some(cache.check(dst, fsmid, dpath))
    }

    fn file_event(&mut self, level: i32, spath: &Path, dpath: Option<&Path>, what: &str) {
        self.reporter
            .file_event(level, dpath.unwrap_or(spath), what);
    }

    fn error_event(&mut self, spath: &Path, dpath: Option<&Path>, what: impl std::fmt::Display) {
        self.reporter.error(dpath.unwrap_or(spath), what);
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
