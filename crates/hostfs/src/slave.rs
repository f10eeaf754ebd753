//! Server side of the remote host channel.
//!
//! [`serve`] is what `-S` runs: it answers wire requests against the
//! local filesystem until the peer shuts the channel down or the stream
//! ends. Open files live in a handle table keyed by the ids handed back
//! from `OpenRead`/`Create`; a vanished peer leaks nothing because the
//! table drops with the loop.
//!
//! Filesystem failures are answered as error frames and the loop keeps
//! going; only a broken or malformed channel ends the session with an
//! error.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;

use crate::wire::{
    Opcode, PayloadBuf, PayloadParser, read_request, write_err, write_hello, write_ok,
};
use crate::{HostError, HostFs, HostResult, LocalFs};

enum Handle {
    Reader(File),
    Writer(File),
}

struct Session {
    fs: LocalFs,
    handles: HashMap<u32, Handle>,
    next_id: u32,
}

impl Session {
    fn new() -> Self {
        Self {
            fs: LocalFs::new(),
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, handle: Handle) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.handles.insert(id, handle);
        id
    }

    fn bad_handle() -> HostError {
        HostError::Io(io::Error::from_raw_os_error(libc::EBADF))
    }

    fn dispatch(&mut self, opcode: Opcode, payload: &[u8]) -> HostResult<Vec<u8>> {
        let mut parser = PayloadParser::new(payload);
        let mut reply = PayloadBuf::new();

        match opcode {
            Opcode::Stat | Opcode::Lstat => {
                let path = parser.take_path()?;
                parser.finish()?;
                let stat = if opcode == Opcode::Stat {
                    self.fs.stat(&path)?
                } else {
                    self.fs.lstat(&path)?
                };
                reply.put_stat(&stat);
            }
            Opcode::OpenRead => {
                let path = parser.take_path()?;
                parser.finish()?;
                let file = File::open(&path)?;
                let id = self.insert(Handle::Reader(file));
                reply.put_u32(id);
            }
            Opcode::Create => {
                let path = parser.take_path()?;
                let mode = parser.take_u32()?;
                parser.finish()?;
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(mode)
                    .open(&path)?;
                let id = self.insert(Handle::Writer(file));
                reply.put_u32(id);
            }
            Opcode::Read => {
                let id = parser.take_u32()?;
                let want = parser.take_u32()?.min(crate::wire::IO_CHUNK as u32) as usize;
                parser.finish()?;
                let Some(Handle::Reader(file)) = self.handles.get_mut(&id) else {
                    return Err(Self::bad_handle());
                };
                let mut buf = vec![0u8; want];
                let got = file.read(&mut buf)?;
                reply.put_bytes(&buf[..got]);
            }
            Opcode::Write => {
                let id = parser.take_u32()?;
                let data = parser.take_bytes()?;
                parser.finish()?;
                let Some(Handle::Writer(file)) = self.handles.get_mut(&id) else {
                    return Err(Self::bad_handle());
                };
                file.write_all(data)?;
            }
            Opcode::Close => {
                let id = parser.take_u32()?;
                parser.finish()?;
                if self.handles.remove(&id).is_none() {
                    return Err(Self::bad_handle());
                }
            }
            Opcode::ReadDir => {
                let path = parser.take_path()?;
                parser.finish()?;
                let names = self.fs.read_dir(&path)?;
                reply.put_u32(names.len() as u32);
                for name in &names {
                    use std::os::unix::ffi::OsStrExt;
                    reply.put_bytes(name.as_os_str().as_bytes());
                }
            }
            Opcode::Mkdir => {
                let path = parser.take_path()?;
                let mode = parser.take_u32()?;
                parser.finish()?;
                self.fs.mkdir(&path, mode)?;
            }
            Opcode::Rmdir => {
                let path = parser.take_path()?;
                parser.finish()?;
                self.fs.rmdir(&path)?;
            }
            Opcode::Remove => {
                let path = parser.take_path()?;
                parser.finish()?;
                self.fs.remove(&path)?;
            }
            Opcode::Rename => {
                let from = parser.take_path()?;
                let to = parser.take_path()?;
                parser.finish()?;
                self.fs.rename(&from, &to)?;
            }
            Opcode::Hardlink => {
                let existing = parser.take_path()?;
                let new = parser.take_path()?;
                parser.finish()?;
                self.fs.hardlink(&existing, &new)?;
            }
            Opcode::Symlink => {
                let target = parser.take_path()?;
                let path = parser.take_path()?;
                parser.finish()?;
                self.fs.symlink(&target, &path)?;
            }
            Opcode::ReadLink => {
                let path = parser.take_path()?;
                parser.finish()?;
                let target = self.fs.read_link(&path)?;
                reply.put_path(&target);
            }
            Opcode::Chmod => {
                let path = parser.take_path()?;
                let mode = parser.take_u32()?;
                parser.finish()?;
                self.fs.chmod(&path, mode)?;
            }
            Opcode::Chown | Opcode::Lchown => {
                let path = parser.take_path()?;
                let uid = parser.take_u32()?;
                let gid = parser.take_u32()?;
                parser.finish()?;
                if opcode == Opcode::Chown {
                    self.fs.chown(&path, uid, gid)?;
                } else {
                    self.fs.lchown(&path, uid, gid)?;
                }
            }
            Opcode::Chflags => {
                let path = parser.take_path()?;
                let flags = parser.take_u32()?;
                parser.finish()?;
                self.fs.chflags(&path, flags)?;
            }
            Opcode::SetTimes => {
                let path = parser.take_path()?;
                let mtime = parser.take_i64()?;
                parser.finish()?;
                self.fs.set_times(&path, mtime)?;
            }
            Opcode::Umask => {
                let mask = parser.take_u32()?;
                parser.finish()?;
                let previous = self.fs.set_umask(mask)?;
                reply.put_u32(previous);
            }
            Opcode::Mknod => {
                let path = parser.take_path()?;
                let mode = parser.take_u32()?;
                let rdev = parser.take_u64()?;
                parser.finish()?;
                self.fs.mknod(&path, mode, rdev)?;
            }
            Opcode::Shutdown => {
                parser.finish()?;
            }
        }
        Ok(reply.into_bytes())
    }
}

/// Services wire requests against the local filesystem until the peer
/// disconnects.
pub fn serve<R: Read, W: Write>(mut reader: R, mut writer: W) -> io::Result<()> {
    write_hello(&mut writer)?;
    crate::wire::read_hello(&mut reader).map_err(io::Error::from)?;

    let mut session = Session::new();
    loop {
        let Some((opcode, payload)) = read_request(&mut reader).map_err(io::Error::from)? else {
            return Ok(());
        };
        match session.dispatch(opcode, &payload) {
            Ok(reply) => write_ok(&mut writer, &reply)?,
            Err(HostError::Io(error)) => {
                let errno = error.raw_os_error().unwrap_or(0);
                write_err(&mut writer, errno, &error.to_string())?;
            }
            // A malformed payload means the channel itself is unusable.
            Err(error @ HostError::Protocol(_)) => return Err(error.into()),
        }
        if opcode == Opcode::Shutdown {
            return Ok(());
        }
    }
}
