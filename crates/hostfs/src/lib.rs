#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `hostfs` is the single filesystem capability the replication core
//! consumes. Every operation the engine performs — metadata queries, file
//! I/O, namespace mutation, link management — goes through the [`HostFs`]
//! trait. [`LocalFs`] routes to the operating system; [`RemoteFs`] routes
//! to a peer process speaking the framed wire protocol in [`wire`],
//! serviced on the far side by [`slave::serve`]. The core holds
//! `&dyn HostFs` for each side and never knows which one it has.
//!
//! # Design
//!
//! [`FileStat`] is a flattened, fixed-width stat tuple so the same struct
//! doubles as the protocol's stat payload. File content moves through
//! plain [`Read`](std::io::Read)/[`Write`](std::io::Write) handles
//! returned by [`HostFs::open_reader`] and [`HostFs::create_writer`]; the
//! remote implementations translate reads and writes into request frames
//! against a peer-held file table.
//!
//! # Errors
//!
//! [`HostError`] wraps the underlying [`io::Error`](std::io::Error) so the
//! OS errno survives the trait boundary — remote errors are
//! re-materialized from the peer's errno on the client side. Protocol
//! violations get their own variant; they indicate a broken or hostile
//! peer, not a filesystem condition.

mod local;
pub mod remote;
pub mod slave;
pub mod wire;

mod flags;

pub use local::LocalFs;
pub use remote::RemoteFs;

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for host filesystem operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors surfaced by [`HostFs`] operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The underlying filesystem call failed.
    #[error("{0}")]
    Io(#[from] io::Error),
    /// The remote peer sent a malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HostError {
    /// Returns the OS errno when one is available.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(error) => error.raw_os_error(),
            Self::Protocol(_) => None,
        }
    }

    /// Returns `true` when the error is the filesystem refusing another
    /// hard link to an inode.
    #[must_use]
    pub fn is_link_limit(&self) -> bool {
        self.raw_os_error() == Some(libc::EMLINK)
    }

    /// Returns `true` for a not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(error) if error.kind() == io::ErrorKind::NotFound)
    }
}

/// Object kind derived from the mode word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Block device node.
    BlockDev,
    /// Character device node.
    CharDev,
    /// Anything else (FIFO, socket, unknown).
    Other,
}

impl FileKind {
    /// Returns `true` for block and character device nodes.
    #[must_use]
    pub const fn is_device(self) -> bool {
        matches!(self, Self::BlockDev | Self::CharDev)
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;
const S_IFBLK: u32 = 0o060000;
const S_IFCHR: u32 = 0o020000;

/// Flattened stat tuple shared by the local backend and the wire protocol.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileStat {
    /// Full mode word including the type bits.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, whole seconds since the epoch.
    pub mtime: i64,
    /// Hard link count.
    pub nlink: u64,
    /// Inode number.
    pub ino: u64,
    /// Device the object lives on.
    pub dev: u64,
    /// Device number encoded in a device node.
    pub rdev: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// BSD file flags when the platform records them.
    pub flags: Option<u32>,
    /// Filesystem-assigned content id when the platform records one.
    pub fsmid: Option<u64>,
}

impl FileStat {
    /// Derives the object kind from the mode word.
    #[must_use]
    pub const fn kind(&self) -> FileKind {
        match self.mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            S_IFBLK => FileKind::BlockDev,
            S_IFCHR => FileKind::CharDev,
            _ => FileKind::Other,
        }
    }

    /// Returns the permission bits (including setuid/setgid/sticky).
    #[must_use]
    pub const fn perms(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Returns the file flags, treating "not recorded" as zero.
    #[must_use]
    pub fn flags_or_zero(&self) -> u32 {
        self.flags.unwrap_or(0)
    }

    /// Apparent on-disk size: allocated blocks, trimmed by the slack of
    /// the final partial block. Used for byte accounting only.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        let mut size = self.blocks * 512;
        let tail = self.size % 512;
        if tail != 0 {
            size = size.saturating_sub(512 - tail);
        }
        size
    }
}

/// The uniform filesystem capability.
///
/// Every operation mirrors a POSIX call. Implementations report failures
/// as [`HostError`] values carrying the OS errno; callers that need to
/// distinguish conditions (`EMLINK`, not-found) test the error rather
/// than an out-of-band field.
pub trait HostFs {
    /// `stat` — metadata following symlinks.
    fn stat(&self, path: &Path) -> HostResult<FileStat>;

    /// `lstat` — metadata without following symlinks.
    fn lstat(&self, path: &Path) -> HostResult<FileStat>;

    /// Opens `path` for reading.
    fn open_reader<'a>(&'a self, path: &Path) -> HostResult<Box<dyn Read + 'a>>;

    /// Creates `path` exclusively (`O_WRONLY|O_CREAT|O_EXCL`) with the
    /// given permission bits and opens it for writing.
    fn create_writer<'a>(&'a self, path: &Path, mode: u32) -> HostResult<Box<dyn Write + 'a>>;

    /// Lists directory entry names in the order the OS returns them.
    /// `.` and `..` are not included.
    fn read_dir(&self, path: &Path) -> HostResult<Vec<OsString>>;

    /// Creates a directory with the given permission bits.
    fn mkdir(&self, path: &Path, mode: u32) -> HostResult<()>;

    /// Removes an empty directory.
    fn rmdir(&self, path: &Path) -> HostResult<()>;

    /// Unlinks a non-directory.
    fn remove(&self, path: &Path) -> HostResult<()>;

    /// Atomically renames `from` over `to`.
    fn rename(&self, from: &Path, to: &Path) -> HostResult<()>;

    /// Creates a hard link at `new` referring to `existing`.
    fn hardlink(&self, existing: &Path, new: &Path) -> HostResult<()>;

    /// Creates a symbolic link at `path` pointing at `target`.
    fn symlink(&self, target: &Path, path: &Path) -> HostResult<()>;

    /// Reads a symbolic link's target text.
    fn read_link(&self, path: &Path) -> HostResult<PathBuf>;

    /// Sets permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> HostResult<()>;

    /// Sets ownership, following symlinks.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()>;

    /// Sets ownership on the link itself.
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()>;

    /// Sets BSD file flags. A no-op where the platform has none.
    fn chflags(&self, path: &Path, flags: u32) -> HostResult<()>;

    /// Sets access and modification time to `mtime` (whole seconds).
    fn set_times(&self, path: &Path, mtime: i64) -> HostResult<()>;

    /// Sets the process umask, returning the previous value.
    fn set_umask(&self, mask: u32) -> HostResult<u32>;

    /// Creates a device node.
    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> HostResult<()>;
}
