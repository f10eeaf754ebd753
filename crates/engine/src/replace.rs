//! Flag-clearing rename and link.
//!
//! Immutable or append-only flags on a live system block the atomic
//! rename that finishes every copy, and block new hard links to a
//! flagged file. These helpers retry once with the blocking flags
//! cleared and put the flags back when the retry fails too, so an error
//! return leaves the destination exactly as it was found.

use std::path::Path;

use hostfs::{HostFs, HostResult};

/// Renames `from` over `to`, clearing destination flags if the first
/// attempt fails.
pub fn safe_rename(host: &dyn HostFs, from: &Path, to: &Path, to_flags: u32) -> HostResult<()> {
    match host.rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = host.chflags(to, 0);
            match host.rename(from, to) {
                Ok(()) => Ok(()),
                Err(error) => {
                    let _ = host.chflags(to, to_flags);
                    Err(error)
                }
            }
        }
    }
}

/// Hard-links `existing` to `new`, clearing the source file's flags for
/// the retry. The retry's error is returned unchanged so the caller can
/// still distinguish `EMLINK`.
pub fn safe_link(host: &dyn HostFs, existing: &Path, new: &Path, existing_flags: u32) -> HostResult<()> {
    match host.hardlink(existing, new) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = host.chflags(existing, 0);
            let result = host.hardlink(existing, new);
            let _ = host.chflags(existing, existing_flags);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostfs::LocalFs;
    use std::fs;

    #[test]
    fn safe_rename_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        let local = LocalFs::new();
        safe_rename(&local, &from, &to, 0).expect("rename succeeds");
        assert_eq!(fs::read(&to).unwrap(), b"new");
        assert!(!from.exists());
    }

    #[test]
    fn safe_rename_reports_missing_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = LocalFs::new();
        assert!(
            safe_rename(
                &local,
                &dir.path().join("absent"),
                &dir.path().join("to"),
                0
            )
            .is_err()
        );
    }

    #[test]
    fn safe_link_creates_second_name_for_inode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let existing = dir.path().join("existing");
        let new = dir.path().join("new");
        fs::write(&existing, b"data").unwrap();

        let local = LocalFs::new();
        safe_link(&local, &existing, &new, 0).expect("link succeeds");

        use std::os::unix::fs::MetadataExt;
        assert_eq!(
            fs::metadata(&existing).unwrap().ino(),
            fs::metadata(&new).unwrap().ino()
        );
    }

    #[test]
    fn safe_link_surfaces_the_retry_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = LocalFs::new();
        let error = safe_link(
            &local,
            &dir.path().join("absent"),
            &dir.path().join("new"),
            0,
        )
        .unwrap_err();
        assert!(error.is_not_found());
    }
}
