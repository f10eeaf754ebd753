//! Framed request/response codec for the remote host channel.
//!
//! The channel is strictly request/response with no pipelining. Every
//! value is little-endian and fixed-width; byte strings (paths, link
//! targets, file data) carry a `u32` length prefix. A request frame is
//! `opcode:u8 len:u32 payload`; a response frame is
//! `status:u8 len:u32 payload`, where an error payload is the peer's
//! errno followed by message text.
//!
//! Both ends begin with an identical hello (`magic || version`); a
//! mismatch aborts before any filesystem operation is attempted.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::{FileStat, HostError, HostResult};

/// Channel magic, first bytes on the wire in both directions.
pub const MAGIC: [u8; 4] = *b"TDFS";

/// Protocol revision. Bumped on any frame-format change.
pub const VERSION: u8 = 1;

/// Upper bound on a single frame payload.
///
/// Large enough for a directory listing of several hundred thousand
/// entries; small enough that a corrupt length prefix cannot ask the
/// peer to allocate arbitrary memory.
pub const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Chunk size for file content moving through `Read`/`Write` requests.
pub const IO_CHUNK: usize = 64 * 1024;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

/// Request opcodes, one per host operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    /// stat following symlinks.
    Stat = 1,
    /// stat without following symlinks.
    Lstat = 2,
    /// Open a file for reading; returns a handle id.
    OpenRead = 3,
    /// Read up to N bytes from a handle.
    Read = 4,
    /// Exclusively create a file for writing; returns a handle id.
    Create = 5,
    /// Write bytes to a handle.
    Write = 6,
    /// Close a handle.
    Close = 7,
    /// List directory entry names.
    ReadDir = 8,
    /// Create a directory.
    Mkdir = 9,
    /// Remove an empty directory.
    Rmdir = 10,
    /// Unlink a non-directory.
    Remove = 11,
    /// Rename within the host.
    Rename = 12,
    /// Create a hard link.
    Hardlink = 13,
    /// Create a symbolic link.
    Symlink = 14,
    /// Read a symbolic link target.
    ReadLink = 15,
    /// Set permission bits.
    Chmod = 16,
    /// Set ownership following symlinks.
    Chown = 17,
    /// Set ownership on the link itself.
    Lchown = 18,
    /// Set BSD file flags.
    Chflags = 19,
    /// Set access and modification time.
    SetTimes = 20,
    /// Set the process umask.
    Umask = 21,
    /// Create a device node.
    Mknod = 22,
    /// Orderly shutdown of the channel.
    Shutdown = 23,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Stat,
            2 => Self::Lstat,
            3 => Self::OpenRead,
            4 => Self::Read,
            5 => Self::Create,
            6 => Self::Write,
            7 => Self::Close,
            8 => Self::ReadDir,
            9 => Self::Mkdir,
            10 => Self::Rmdir,
            11 => Self::Remove,
            12 => Self::Rename,
            13 => Self::Hardlink,
            14 => Self::Symlink,
            15 => Self::ReadLink,
            16 => Self::Chmod,
            17 => Self::Chown,
            18 => Self::Lchown,
            19 => Self::Chflags,
            20 => Self::SetTimes,
            21 => Self::Umask,
            22 => Self::Mknod,
            23 => Self::Shutdown,
            _ => return None,
        })
    }
}

/// Writes the hello preamble.
pub fn write_hello<W: Write + ?Sized>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[VERSION])?;
    writer.flush()
}

/// Reads and verifies the peer's hello preamble.
pub fn read_hello<R: Read + ?Sized>(reader: &mut R) -> HostResult<()> {
    let mut preamble = [0u8; 5];
    reader
        .read_exact(&mut preamble)
        .map_err(|_| HostError::Protocol("peer sent no hello".into()))?;
    if preamble[..4] != MAGIC {
        return Err(HostError::Protocol("bad channel magic".into()));
    }
    if preamble[4] != VERSION {
        return Err(HostError::Protocol(format!(
            "peer speaks protocol revision {}, expected {}",
            preamble[4], VERSION
        )));
    }
    Ok(())
}

fn check_len(len: u32) -> HostResult<usize> {
    if len > MAX_PAYLOAD {
        return Err(HostError::Protocol(format!(
            "frame length {len} exceeds limit"
        )));
    }
    Ok(len as usize)
}

/// Sends a request frame.
pub fn write_request<W: Write + ?Sized>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
) -> io::Result<()> {
    writer.write_all(&[opcode as u8])?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Receives a request frame. Returns `None` on clean end-of-stream.
pub fn read_request<R: Read + ?Sized>(reader: &mut R) -> HostResult<Option<(Opcode, Vec<u8>)>> {
    let mut head = [0u8; 1];
    match reader.read_exact(&mut head) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let opcode = Opcode::from_u8(head[0])
        .ok_or_else(|| HostError::Protocol(format!("unknown opcode {}", head[0])))?;

    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = check_len(u32::from_le_bytes(len))?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some((opcode, payload)))
}

/// Sends a success response.
pub fn write_ok<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&[STATUS_OK])?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Sends a failure response carrying the errno and message text.
pub fn write_err<W: Write + ?Sized>(writer: &mut W, errno: i32, message: &str) -> io::Result<()> {
    let mut payload = PayloadBuf::new();
    payload.put_i32(errno);
    payload.put_bytes(message.as_bytes());
    let payload = payload.into_bytes();

    writer.write_all(&[STATUS_ERR])?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

/// Receives a response frame, converting a failure back into the error
/// the peer observed.
pub fn read_response<R: Read + ?Sized>(reader: &mut R) -> HostResult<Vec<u8>> {
    let mut head = [0u8; 5];
    reader.read_exact(&mut head)?;
    let len = check_len(u32::from_le_bytes([head[1], head[2], head[3], head[4]]))?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    match head[0] {
        STATUS_OK => Ok(payload),
        STATUS_ERR => {
            let mut parser = PayloadParser::new(&payload);
            let errno = parser.take_i32()?;
            let message = String::from_utf8_lossy(parser.take_bytes()?).into_owned();
            if errno != 0 {
                Err(io::Error::from_raw_os_error(errno).into())
            } else {
                Err(io::Error::other(message).into())
            }
        }
        status => Err(HostError::Protocol(format!(
            "unknown response status {status}"
        ))),
    }
}

/// Incrementally builds a frame payload.
#[derive(Debug, Default)]
pub struct PayloadBuf {
    bytes: Vec<u8>,
}

impl PayloadBuf {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `u8`.
    pub fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends a `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an `i64`.
    pub fn put_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a length-prefixed byte string.
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.bytes.extend_from_slice(value);
    }

    /// Appends a path as a length-prefixed byte string.
    pub fn put_path(&mut self, path: &Path) {
        use std::os::unix::ffi::OsStrExt;
        self.put_bytes(path.as_os_str().as_bytes());
    }

    /// Appends a stat tuple.
    pub fn put_stat(&mut self, stat: &FileStat) {
        self.put_u32(stat.mode);
        self.put_u32(stat.uid);
        self.put_u32(stat.gid);
        self.put_u64(stat.size);
        self.put_i64(stat.mtime);
        self.put_u64(stat.nlink);
        self.put_u64(stat.ino);
        self.put_u64(stat.dev);
        self.put_u64(stat.rdev);
        self.put_u64(stat.blocks);
        let presence = u8::from(stat.flags.is_some()) | (u8::from(stat.fsmid.is_some()) << 1);
        self.put_u8(presence);
        if let Some(flags) = stat.flags {
            self.put_u32(flags);
        }
        if let Some(fsmid) = stat.fsmid {
            self.put_u64(fsmid);
        }
    }

    /// Finishes the payload.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Walks a received frame payload.
#[derive(Debug)]
pub struct PayloadParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadParser<'a> {
    /// Wraps a payload for parsing.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> HostResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| HostError::Protocol("truncated payload".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a `u8`.
    pub fn take_u8(&mut self) -> HostResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a `u32`.
    pub fn take_u32(&mut self) -> HostResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads an `i32`.
    pub fn take_i32(&mut self) -> HostResult<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    /// Reads a `u64`.
    pub fn take_u64(&mut self) -> HostResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads an `i64`.
    pub fn take_i64(&mut self) -> HostResult<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Reads a length-prefixed byte string.
    pub fn take_bytes(&mut self) -> HostResult<&'a [u8]> {
        let len = self.take_u32()? as usize;
        self.take(len)
    }

    /// Reads a path.
    pub fn take_path(&mut self) -> HostResult<PathBuf> {
        use std::os::unix::ffi::OsStrExt;
        let bytes = self.take_bytes()?;
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }

    /// Reads a stat tuple.
    pub fn take_stat(&mut self) -> HostResult<FileStat> {
        let mode = self.take_u32()?;
        let uid = self.take_u32()?;
        let gid = self.take_u32()?;
        let size = self.take_u64()?;
        let mtime = self.take_i64()?;
        let nlink = self.take_u64()?;
        let ino = self.take_u64()?;
        let dev = self.take_u64()?;
        let rdev = self.take_u64()?;
        let blocks = self.take_u64()?;
        let presence = self.take_u8()?;
        let flags = if presence & 1 != 0 {
            Some(self.take_u32()?)
        } else {
            None
        };
        let fsmid = if presence & 2 != 0 {
            Some(self.take_u64()?)
        } else {
            None
        };
        Ok(FileStat {
            mode,
            uid,
            gid,
            size,
            mtime,
            nlink,
            ino,
            dev,
            rdev,
            blocks,
            flags,
            fsmid,
        })
    }

    /// Requires the payload to be fully consumed.
    pub fn finish(self) -> HostResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(HostError::Protocol("trailing bytes in payload".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frames_round_trip() {
        let mut channel = Vec::new();
        let mut payload = PayloadBuf::new();
        payload.put_path(Path::new("/some/where"));
        write_request(&mut channel, Opcode::Lstat, &payload.into_bytes()).unwrap();

        let (opcode, payload) = read_request(&mut channel.as_slice()).unwrap().unwrap();
        assert_eq!(opcode, Opcode::Lstat);
        let mut parser = PayloadParser::new(&payload);
        assert_eq!(parser.take_path().unwrap(), PathBuf::from("/some/where"));
        parser.finish().unwrap();
    }

    #[test]
    fn clean_eof_reads_as_none() {
        let empty: &[u8] = &[];
        assert!(read_request(&mut &*empty).unwrap().is_none());
    }

    #[test]
    fn error_response_restores_errno() {
        let mut channel = Vec::new();
        write_err(&mut channel, libc::ENOENT, "open failed").unwrap();

        let error = read_response(&mut channel.as_slice()).unwrap_err();
        assert_eq!(error.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn stat_codec_round_trips_optional_fields() {
        let stat = FileStat {
            mode: 0o100644,
            uid: 1000,
            gid: 100,
            size: 4096,
            mtime: 1_700_000_000,
            nlink: 2,
            ino: 42,
            dev: 7,
            rdev: 0,
            blocks: 8,
            flags: Some(0x20000),
            fsmid: None,
        };
        let mut payload = PayloadBuf::new();
        payload.put_stat(&stat);
        let bytes = payload.into_bytes();

        let mut parser = PayloadParser::new(&bytes);
        assert_eq!(parser.take_stat().unwrap(), stat);
        parser.finish().unwrap();
    }

    #[test]
    fn truncated_payload_is_a_protocol_error() {
        let mut payload = PayloadBuf::new();
        payload.put_u32(9);
        let bytes = payload.into_bytes();

        let mut parser = PayloadParser::new(&bytes);
        assert!(matches!(
            parser.take_u64(),
            Err(HostError::Protocol(_))
        ));
    }

    #[test]
    fn hello_rejects_version_skew() {
        let mut channel = Vec::new();
        channel.extend_from_slice(&MAGIC);
        channel.push(VERSION + 1);
        assert!(matches!(
            read_hello(&mut channel.as_slice()),
            Err(HostError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut channel = Vec::new();
        channel.push(Opcode::Read as u8);
        channel.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        assert!(matches!(
            read_request(&mut channel.as_slice()),
            Err(HostError::Protocol(_))
        ));
    }
}
