//! Client side of the remote host channel.
//!
//! A [`RemoteFs`] owns a request/response channel to a peer process
//! running [`slave::serve`](crate::slave::serve) — normally
//! `ssh <host> <program> -S` — and implements [`HostFs`] by translating
//! each operation into one wire request. File handles opened on the peer
//! are referenced by numeric ids; the [`Read`]/[`Write`] adapters close
//! them on drop.
//!
//! A broken channel (peer died, ssh torn down) surfaces as an ordinary
//! I/O error on whichever operation hits it. The Rust runtime already
//! ignores `SIGPIPE` process-wide, so a write into a dead pipe fails with
//! `EPIPE` instead of killing the run; nothing here needs to touch signal
//! dispositions.

use std::cell::RefCell;
use std::ffi::OsString;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::wire::{
    IO_CHUNK, Opcode, PayloadBuf, PayloadParser, read_hello, read_response, write_hello,
    write_request,
};
use crate::{FileStat, HostError, HostFs, HostResult};

impl From<HostError> for io::Error {
    fn from(error: HostError) -> Self {
        match error {
            HostError::Io(error) => error,
            HostError::Protocol(message) => io::Error::other(message),
        }
    }
}

struct Channel {
    reader: Box<dyn Read>,
    writer: Box<dyn Write>,
    child: Option<Child>,
}

/// Host handle that routes every operation to a remote peer.
pub struct RemoteFs {
    channel: RefCell<Channel>,
}

impl RemoteFs {
    /// Connects to `[user@]host` by spawning `ssh` running `program -S`
    /// on the far side, then performs the hello exchange.
    pub fn connect(target: &str, program: &str) -> HostResult<Self> {
        let mut child = Command::new("ssh")
            .arg(target)
            .arg(program)
            .arg("-S")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        Self::over(Box::new(BufReader::new(stdout)), Box::new(stdin), Some(child))
    }

    /// Builds a remote host over an existing byte channel.
    ///
    /// Used by tests to wire a client directly to an in-process server.
    pub fn over(
        reader: Box<dyn Read>,
        writer: Box<dyn Write>,
        child: Option<Child>,
    ) -> HostResult<Self> {
        let mut channel = Channel {
            reader,
            writer,
            child,
        };
        write_hello(&mut channel.writer)?;
        read_hello(&mut channel.reader)?;
        Ok(Self {
            channel: RefCell::new(channel),
        })
    }

    fn call(&self, opcode: Opcode, payload: PayloadBuf) -> HostResult<Vec<u8>> {
        let mut channel = self.channel.borrow_mut();
        let channel = &mut *channel;
        write_request(&mut channel.writer, opcode, &payload.into_bytes())?;
        read_response(&mut channel.reader)
    }

    fn call_unit(&self, opcode: Opcode, payload: PayloadBuf) -> HostResult<()> {
        let reply = self.call(opcode, payload)?;
        PayloadParser::new(&reply).finish()
    }

    fn call_path_unit(&self, opcode: Opcode, path: &Path) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        self.call_unit(opcode, payload)
    }

    fn stat_request(&self, opcode: Opcode, path: &Path) -> HostResult<FileStat> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        let reply = self.call(opcode, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let stat = parser.take_stat()?;
        parser.finish()?;
        Ok(stat)
    }

    fn close_handle(&self, id: u32) {
        let mut payload = PayloadBuf::new();
        payload.put_u32(id);
        let _ = self.call(Opcode::Close, payload);
    }
}

impl Drop for RemoteFs {
    fn drop(&mut self) {
        let _ = self.call(Opcode::Shutdown, PayloadBuf::new());
        if let Some(mut child) = self.channel.borrow_mut().child.take() {
            let _ = child.wait();
        }
    }
}

struct RemoteReader<'a> {
    fs: &'a RemoteFs,
    id: u32,
    eof: bool,
}

impl Read for RemoteReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(IO_CHUNK) as u32;
        let mut payload = PayloadBuf::new();
        payload.put_u32(self.id);
        payload.put_u32(want);
        let reply = self.fs.call(Opcode::Read, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let data = parser.take_bytes().map_err(io::Error::from)?;
        if data.is_empty() {
            self.eof = true;
            return Ok(0);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

impl Drop for RemoteReader<'_> {
    fn drop(&mut self) {
        self.fs.close_handle(self.id);
    }
}

struct RemoteWriter<'a> {
    fs: &'a RemoteFs,
    id: u32,
}

impl Write for RemoteWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = &buf[..buf.len().min(IO_CHUNK)];
        let mut payload = PayloadBuf::new();
        payload.put_u32(self.id);
        payload.put_bytes(chunk);
        self.fs.call(Opcode::Write, payload)?;
        Ok(chunk.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RemoteWriter<'_> {
    fn drop(&mut self) {
        self.fs.close_handle(self.id);
    }
}

impl HostFs for RemoteFs {
    fn stat(&self, path: &Path) -> HostResult<FileStat> {
        self.stat_request(Opcode::Stat, path)
    }

    fn lstat(&self, path: &Path) -> HostResult<FileStat> {
        self.stat_request(Opcode::Lstat, path)
    }

    fn open_reader<'a>(&'a self, path: &Path) -> HostResult<Box<dyn Read + 'a>> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        let reply = self.call(Opcode::OpenRead, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let id = parser.take_u32()?;
        parser.finish()?;
        Ok(Box::new(RemoteReader {
            fs: self,
            id,
            eof: false,
        }))
    }

    fn create_writer<'a>(&'a self, path: &Path, mode: u32) -> HostResult<Box<dyn Write + 'a>> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(mode);
        let reply = self.call(Opcode::Create, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let id = parser.take_u32()?;
        parser.finish()?;
        Ok(Box::new(RemoteWriter { fs: self, id }))
    }

    fn read_dir(&self, path: &Path) -> HostResult<Vec<OsString>> {
        use std::os::unix::ffi::OsStringExt;
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        let reply = self.call(Opcode::ReadDir, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let count = parser.take_u32()?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            names.push(OsString::from_vec(parser.take_bytes()?.to_vec()));
        }
        parser.finish()?;
        Ok(names)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(mode);
        self.call_unit(Opcode::Mkdir, payload)
    }

    fn rmdir(&self, path: &Path) -> HostResult<()> {
        self.call_path_unit(Opcode::Rmdir, path)
    }

    fn remove(&self, path: &Path) -> HostResult<()> {
        self.call_path_unit(Opcode::Remove, path)
    }

    fn rename(&self, from: &Path, to: &Path) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(from);
        payload.put_path(to);
        self.call_unit(Opcode::Rename, payload)
    }

    fn hardlink(&self, existing: &Path, new: &Path) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(existing);
        payload.put_path(new);
        self.call_unit(Opcode::Hardlink, payload)
    }

    fn symlink(&self, target: &Path, path: &Path) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(target);
        payload.put_path(path);
        self.call_unit(Opcode::Symlink, payload)
    }

    fn read_link(&self, path: &Path) -> HostResult<PathBuf> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        let reply = self.call(Opcode::ReadLink, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let target = parser.take_path()?;
        parser.finish()?;
        Ok(target)
    }

    fn chmod(&self, path: &Path, mode: u32) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(mode);
        self.call_unit(Opcode::Chmod, payload)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(uid);
        payload.put_u32(gid);
        self.call_unit(Opcode::Chown, payload)
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(uid);
        payload.put_u32(gid);
        self.call_unit(Opcode::Lchown, payload)
    }

    fn chflags(&self, path: &Path, flags: u32) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(flags);
        self.call_unit(Opcode::Chflags, payload)
    }

    fn set_times(&self, path: &Path, mtime: i64) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_i64(mtime);
        self.call_unit(Opcode::SetTimes, payload)
    }

    fn set_umask(&self, mask: u32) -> HostResult<u32> {
        let mut payload = PayloadBuf::new();
        payload.put_u32(mask);
        let reply = self.call(Opcode::Umask, payload)?;
        let mut parser = PayloadParser::new(&reply);
        let previous = parser.take_u32()?;
        parser.finish()?;
        Ok(previous)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> HostResult<()> {
        let mut payload = PayloadBuf::new();
        payload.put_path(path);
        payload.put_u32(mode);
        payload.put_u64(rdev);
        self.call_unit(Opcode::Mknod, payload)
    }
}

impl std::fmt::Debug for RemoteFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFs").finish_non_exhaustive()
    }
}
