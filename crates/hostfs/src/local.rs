//! OS-backed implementation of the host filesystem capability.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, symlink};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use rustix::fs::{AtFlags, CWD, Mode};

use crate::flags;
use crate::{FileStat, HostFs, HostResult};

/// Raw `Uid`/`Gid` construction, kept in one audited spot.
#[allow(unsafe_code)]
mod ids {
    pub(super) const fn uid_from_raw(raw: libc::uid_t) -> rustix::fs::Uid {
        unsafe { rustix::fs::Uid::from_raw(raw) }
    }

    pub(super) const fn gid_from_raw(raw: libc::gid_t) -> rustix::fs::Gid {
        unsafe { rustix::fs::Gid::from_raw(raw) }
    }
}

/// Host handle that routes every operation to the local OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl LocalFs {
    /// Creates a local host handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn stat_of(metadata: &fs::Metadata, flags: Option<u32>) -> FileStat {
        FileStat {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            mtime: metadata.mtime(),
            nlink: metadata.nlink(),
            ino: metadata.ino(),
            dev: metadata.dev(),
            rdev: metadata.rdev(),
            blocks: metadata.blocks(),
            flags,
            // No portable source for a filesystem content id; platforms
            // without one leave the check in the "unknown" state.
            fsmid: None,
        }
    }

    fn chown_at(path: &Path, uid: u32, gid: u32, at_flags: AtFlags) -> HostResult<()> {
        rustix::fs::chownat(
            CWD,
            path,
            Some(ids::uid_from_raw(uid)),
            Some(ids::gid_from_raw(gid)),
            at_flags,
        )
        .map_err(|errno| std::io::Error::from(errno).into())
    }
}

impl HostFs for LocalFs {
    fn stat(&self, path: &Path) -> HostResult<FileStat> {
        let metadata = fs::metadata(path)?;
        let flags = flags::stat_flags(path)?;
        Ok(Self::stat_of(&metadata, flags))
    }

    fn lstat(&self, path: &Path) -> HostResult<FileStat> {
        let metadata = fs::symlink_metadata(path)?;
        let flags = flags::stat_flags(path)?;
        Ok(Self::stat_of(&metadata, flags))
    }

    fn open_reader<'a>(&'a self, path: &Path) -> HostResult<Box<dyn Read + 'a>> {
        let file = fs::File::open(path)?;
        Ok(Box::new(file))
    }

    fn create_writer<'a>(&'a self, path: &Path, mode: u32) -> HostResult<Box<dyn Write + 'a>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn read_dir(&self, path: &Path) -> HostResult<Vec<OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name());
        }
        Ok(names)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> HostResult<()> {
        rustix::fs::mkdirat(CWD, path, Mode::from_raw_mode(mode as _))
            .map_err(|errno| std::io::Error::from(errno).into())
    }

    fn rmdir(&self, path: &Path) -> HostResult<()> {
        fs::remove_dir(path)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> HostResult<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> HostResult<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn hardlink(&self, existing: &Path, new: &Path) -> HostResult<()> {
        fs::hard_link(existing, new)?;
        Ok(())
    }

    fn symlink(&self, target: &Path, path: &Path) -> HostResult<()> {
        symlink(target, path)?;
        Ok(())
    }

    fn read_link(&self, path: &Path) -> HostResult<PathBuf> {
        Ok(fs::read_link(path)?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> HostResult<()> {
        rustix::fs::chmod(path, Mode::from_raw_mode(mode as _))
            .map_err(|errno| std::io::Error::from(errno).into())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()> {
        Self::chown_at(path, uid, gid, AtFlags::empty())
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()> {
        Self::chown_at(path, uid, gid, AtFlags::SYMLINK_NOFOLLOW)
    }

    fn chflags(&self, path: &Path, flags: u32) -> HostResult<()> {
        flags::set_flags(path, flags)?;
        Ok(())
    }

    fn set_times(&self, path: &Path, mtime: i64) -> HostResult<()> {
        let stamp = FileTime::from_unix_time(mtime, 0);
        filetime::set_file_times(path, stamp, stamp)?;
        Ok(())
    }

    fn set_umask(&self, mask: u32) -> HostResult<u32> {
        let previous = rustix::process::umask(Mode::from_raw_mode(mask as _));
        Ok(u32::from(previous.as_raw_mode()))
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> HostResult<()> {
        rustix::fs::mknodat(
            CWD,
            path,
            rustix::fs::FileType::from_raw_mode(mode as _),
            Mode::from_raw_mode((mode & 0o7777) as _),
            rdev,
        )
        .map_err(|errno| std::io::Error::from(errno).into())
    }
}
