//! BSD file-flags access.
//!
//! `chflags` and `st_flags` exist on the BSDs and macOS; Linux has no
//! equivalent. The stubs report "not recorded" so flag comparisons treat
//! both sides as zero and flag mutation is a successful no-op.

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
))]
#[allow(unsafe_code)]
mod imp {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    fn cstring(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
    }

    pub fn stat_flags(path: &Path) -> io::Result<Option<u32>> {
        let cpath = cstring(path)?;
        let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
        let rc = unsafe { libc::lstat(cpath.as_ptr(), st.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let st = unsafe { st.assume_init() };
        Ok(Some(st.st_flags))
    }

    pub fn set_flags(path: &Path, flags: u32) -> io::Result<()> {
        let cpath = cstring(path)?;
        let rc = unsafe { libc::chflags(cpath.as_ptr(), flags.into()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
)))]
mod imp {
    use std::io;
    use std::path::Path;

    pub fn stat_flags(_path: &Path) -> io::Result<Option<u32>> {
        Ok(None)
    }

    pub fn set_flags(_path: &Path, _flags: u32) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) use imp::{set_flags, stat_flags};
