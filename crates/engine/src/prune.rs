//! Recursive destination removal.
//!
//! Invoked for destination entries with no source counterpart and for
//! directories a non-directory source must replace. Removal is bounded
//! by the destination device observed at the call site so a mount point
//! that appeared underneath the mirror is never descended into.

use std::io::BufRead;
use std::path::Path;

use hostfs::FileKind;

use crate::replicate::Replicator;

impl Replicator<'_> {
    /// Removes `dpath` and everything under it, honoring the
    /// confirmation and no-remove modes.
    pub(crate) fn prune(&mut self, dpath: &Path, dev: Option<u64>) {
        let Ok(stat) = self.dst.lstat(dpath) else {
            return;
        };
        let dev = dev.unwrap_or(stat.dev);
        if stat.dev != dev {
            return;
        }

        if stat.kind() == FileKind::Directory {
            if let Ok(names) = self.dst.read_dir(dpath) {
                for name in names {
                    self.prune(&dpath.join(name), Some(dev));
                }
            }
            self.remove_one(dpath, true);
        } else {
            self.remove_one(dpath, false);
        }
    }

    fn remove_one(&mut self, dpath: &Path, is_dir: bool) {
        let (verb, fail) = if is_dir {
            ("rmdir-ok", "rmdir failed")
        } else {
            ("remove-ok", "remove failed")
        };

        if self.options.ask_confirmation && !self.options.no_remove {
            if self.confirm_removal(dpath) {
                if let Err(error) = self.remove_path(dpath, is_dir) {
                    self.reporter.error(dpath, format!("{fail}: {error}"));
                }
                self.stats.removed_items += 1;
            }
        } else if self.options.no_remove {
            self.reporter.file_event(1, dpath, "not-removed");
        } else if let Err(error) = self.remove_path(dpath, is_dir) {
            self.reporter.error(dpath, format!("{fail}: {error}"));
        } else {
            self.reporter.file_event(1, dpath, verb);
            self.stats.removed_items += 1;
        }
    }

    fn remove_path(&self, dpath: &Path, is_dir: bool) -> hostfs::HostResult<()> {
        if is_dir {
            self.dst.rmdir(dpath)
        } else {
            self.dst.remove(dpath)
        }
    }

    /// Prompts on standard error and accepts only a leading `y`/`Y`.
    fn confirm_removal(&mut self, dpath: &Path) -> bool {
        self.reporter
            .prompt(format!("remove {} (Yes/No) [No]? ", dpath.display()));
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.chars().next(), Some('y' | 'Y'))
    }
}
