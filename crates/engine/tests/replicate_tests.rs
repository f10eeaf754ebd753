//! Library-level replication scenarios on real scratch trees.

#![cfg(unix)]

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt, symlink};
use std::path::Path;
use std::sync::{Arc, Mutex};

use engine::{Options, Replicator, Stats};
use hostfs::{HostFs, LocalFs};
use logging::{Reporter, Verbosity};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct RunResult {
    failures: u64,
    stats: Stats,
    stderr: String,
    open_groups: usize,
}

fn batch_options() -> Options {
    Options {
        ask_confirmation: false,
        ..Options::default()
    }
}

fn run_with(options: &Options, src: &Path, dst: &Path) -> RunResult {
    let out = Capture::default();
    let err = Capture::default();
    let mut reporter = Reporter::with_sinks(
        Verbosity(0),
        options.quiet,
        Box::new(out),
        Box::new(err.clone()),
    );
    let local = LocalFs::new();
    let mut replicator = Replicator::new(&local, &local, options, &mut reporter);
    let failures = replicator
        .run(src, Some(dst))
        .expect("source root accessible");
    RunResult {
        failures,
        stats: *replicator.stats(),
        stderr: err.contents(),
        open_groups: replicator.open_hardlink_groups(),
    }
}

fn run(src: &Path, dst: &Path) -> RunResult {
    run_with(&batch_options(), src, dst)
}

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

/// Scenario: mirroring into an empty destination reproduces content,
/// modes, hardlink topology, and symlinks, with the expected counters.
#[test]
fn fresh_mirror_reproduces_tree_and_counters() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();

    fs::write(src.join("a"), b"hello").unwrap();
    fs::set_permissions(src.join("a"), fs::Permissions::from_mode(0o644)).unwrap();
    fs::hard_link(src.join("a"), src.join("b")).unwrap();
    symlink("a", src.join("c")).unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/e"), b"secret").unwrap();
    fs::set_permissions(src.join("d/e"), fs::Permissions::from_mode(0o600)).unwrap();

    let result = run(&src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);

    assert_eq!(fs::read(dst.join("a")).unwrap(), b"hello");
    assert_eq!(mode_of(&dst.join("a")), 0o644);
    assert_eq!(fs::read(dst.join("d/e")).unwrap(), b"secret");
    assert_eq!(mode_of(&dst.join("d/e")), 0o600);
    assert_eq!(fs::read_link(dst.join("c")).unwrap(), Path::new("a"));

    // The hardlink pair shares one inode at the destination.
    assert_eq!(
        fs::metadata(dst.join("a")).unwrap().ino(),
        fs::metadata(dst.join("b")).unwrap().ino()
    );

    // Source mtimes carried over.
    assert_eq!(
        fs::metadata(src.join("a")).unwrap().mtime(),
        fs::metadata(dst.join("a")).unwrap().mtime()
    );

    assert_eq!(result.stats.copied_items, 4);
    assert_eq!(result.stats.source_items, 5);
    assert_eq!(result.stats.removed_items, 0);
    assert_eq!(result.open_groups, 0, "hardlink table drained");
}

/// Law: the second run of an unchanged tree performs no copies and no
/// removals.
#[test]
fn second_run_is_idempotent() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"hello").unwrap();
    fs::hard_link(src.join("a"), src.join("b")).unwrap();
    symlink("a", src.join("c")).unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/e"), b"eee").unwrap();

    let first = run(&src, &dst);
    assert_eq!(first.failures, 0, "stderr: {}", first.stderr);

    let second = run(&src, &dst);
    assert_eq!(second.failures, 0, "stderr: {}", second.stderr);
    assert_eq!(second.stats.copied_items, 0);
    assert_eq!(second.stats.removed_items, 0);
    assert_eq!(second.open_groups, 0);
}

/// Scenario: destination entries absent from the source are pruned.
#[test]
fn stale_destination_entries_are_pruned() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("keep"), b"k").unwrap();

    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("keep"), b"k").unwrap();
    fs::write(dst.join("x"), b"stale").unwrap();
    fs::create_dir(dst.join("old")).unwrap();
    fs::write(dst.join("old/y"), b"stale").unwrap();

    let result = run(&src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);
    assert!(!dst.join("x").exists());
    assert!(!dst.join("old").exists());
    assert_eq!(result.stats.removed_items, 3);
}

/// In no-remove mode stale entries survive.
#[test]
fn no_remove_keeps_stale_entries() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("x"), b"stale").unwrap();

    let options = Options {
        no_remove: true,
        ..batch_options()
    };
    let result = run_with(&options, &src, &dst);
    assert_eq!(result.failures, 0);
    assert!(dst.join("x").exists());
    assert_eq!(result.stats.removed_items, 0);
}

/// Scenario: the ignore file excludes matching names from both the copy
/// and the prune, and is itself never mirrored.
#[test]
fn ignore_file_suppresses_copy_and_prune() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join(".cpignore"), b"skip.log\n*.tmp\n").unwrap();
    fs::write(src.join("keep.txt"), b"keep").unwrap();
    fs::write(src.join("skip.log"), b"skip").unwrap();
    fs::write(src.join("foo.tmp"), b"skip").unwrap();
    fs::write(src.join("bar.txt"), b"keep").unwrap();

    // Destination already holds excluded names; they must survive the
    // prune pass untouched.
    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("stale.tmp"), b"mine").unwrap();

    let options = Options {
        ignore_file: Some(".cpignore".into()),
        ..batch_options()
    };
    let result = run_with(&options, &src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);

    assert!(dst.join("keep.txt").exists());
    assert!(dst.join("bar.txt").exists());
    assert!(!dst.join(".cpignore").exists());
    assert!(!dst.join("skip.log").exists());
    assert!(!dst.join("foo.tmp").exists());
    assert!(dst.join("stale.tmp").exists(), "ignored name not pruned");
}

/// Scenario: a source file colliding with a destination directory is
/// refused under safety, replaced without it.
#[test]
fn safety_refuses_file_over_directory() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("target"), b"file").unwrap();
    fs::create_dir_all(dst.join("target/nested")).unwrap();
    fs::write(dst.join("target/nested/deep"), b"old").unwrap();

    let result = run(&src, &dst);
    assert_eq!(result.failures, 1);
    assert!(result.stderr.contains("SAFETY"));
    assert!(dst.join("target").is_dir(), "refusal leaves the directory");

    let options = Options {
        safety: false,
        ..batch_options()
    };
    let result = run_with(&options, &src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);
    assert!(dst.join("target").is_file());
    assert_eq!(fs::read(dst.join("target")).unwrap(), b"file");
}

/// Scenario: with a prior snapshot configured, an unchanged file is
/// hard-linked from it instead of copied.
#[test]
fn incremental_run_links_from_prior_snapshot() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let prior = scratch.path().join("prior");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("big.bin"), vec![7u8; 65536]).unwrap();

    // Prior snapshot holds an identical copy with identical metadata.
    let first = run(&src, &prior);
    assert_eq!(first.failures, 0, "stderr: {}", first.stderr);

    let options = Options {
        hardlink_base: Some(prior.clone()),
        ..batch_options()
    };
    let result = run_with(&options, &src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);

    assert_eq!(
        fs::metadata(dst.join("big.bin")).unwrap().ino(),
        fs::metadata(prior.join("big.bin")).unwrap().ino()
    );
    // Only directory scaffolding was read, not the file body.
    assert!(result.stats.read_bytes < 4096);
}

/// A touched mtime with identical content still forces a copy: the
/// equality fast path trusts (size, uid, gid, mtime) and nothing else.
#[test]
fn mtime_change_forces_recopy() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("f"), b"body").unwrap();

    let first = run(&src, &dst);
    assert_eq!(first.failures, 0);

    let local = LocalFs::new();
    local.set_times(&src.join("f"), 999_999_999).unwrap();

    let second = run(&src, &dst);
    assert_eq!(second.failures, 0, "stderr: {}", second.stderr);
    assert_eq!(second.stats.copied_items, 1);
    assert_eq!(
        fs::metadata(dst.join("f")).unwrap().mtime(),
        999_999_999
    );
}

/// Digest checking catches silent destination corruption that the
/// metadata fast path would wave through, and reports it.
#[test]
fn digest_check_detects_silent_corruption() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("f"), b"correct!").unwrap();

    let first = run(&src, &dst);
    assert_eq!(first.failures, 0);

    // Corrupt the destination without disturbing size or mtime.
    let local = LocalFs::new();
    let mtime = fs::metadata(src.join("f")).unwrap().mtime();
    fs::write(dst.join("f"), b"corrupt!").unwrap();
    local.set_times(&dst.join("f"), mtime).unwrap();

    let plain = run(&src, &dst);
    assert_eq!(plain.stats.copied_items, 0, "metadata fast path skips it");

    let options = Options {
        md5_cache_file: Some(".MD5.CHECKSUMS".into()),
        ..batch_options()
    };
    let result = run_with(&options, &src, &dst);
    assert_eq!(result.failures, 0, "stderr: {}", result.stderr);
    assert!(result.stderr.contains("md5-CHECK-FAILED"));
    assert_eq!(fs::read(dst.join("f")).unwrap(), b"correct!");
    // The cache itself stays out of the mirror.
    assert!(!dst.join(".MD5.CHECKSUMS").exists());
}

/// A hardlink group partially present at the destination is relinked to
/// a single inode.
#[test]
fn broken_destination_hardlink_is_relinked() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"shared").unwrap();
    fs::hard_link(src.join("a"), src.join("b")).unwrap();

    let first = run(&src, &dst);
    assert_eq!(first.failures, 0);

    // Break the pair: replace b with an independent file of identical
    // content and metadata.
    let mtime = fs::metadata(dst.join("a")).unwrap().mtime();
    fs::remove_file(dst.join("b")).unwrap();
    fs::write(dst.join("b"), b"shared").unwrap();
    let local = LocalFs::new();
    local.set_times(&dst.join("b"), mtime).unwrap();
    local.set_times(&dst.join("a"), mtime).unwrap();
    local.set_times(&src.join("a"), mtime).unwrap();

    let second = run(&src, &dst);
    assert_eq!(second.failures, 0, "stderr: {}", second.stderr);
    assert_eq!(
        fs::metadata(dst.join("a")).unwrap().ino(),
        fs::metadata(dst.join("b")).unwrap().ino()
    );
    assert_eq!(second.open_groups, 0);
}

/// The failure count aggregates across siblings instead of aborting.
#[test]
fn unreadable_source_file_counts_one_failure() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let src = scratch.path().join("src");
    let dst = scratch.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("ok"), b"fine").unwrap();
    fs::write(src.join("secret"), b"hidden").unwrap();
    fs::set_permissions(src.join("secret"), fs::Permissions::from_mode(0o000)).unwrap();

    if fs::File::open(src.join("secret")).is_ok() {
        // Running privileged; the scenario cannot fail.
        return;
    }

    let result = run(&src, &dst);
    assert_eq!(result.failures, 1);
    assert!(result.stderr.contains("open failed"));
    assert!(dst.join("ok").exists(), "siblings still replicated");
}

/// An absent source root is the one fatal error.
#[test]
fn missing_source_root_is_fatal() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let out = Capture::default();
    let err = Capture::default();
    let mut reporter =
        Reporter::with_sinks(Verbosity(0), false, Box::new(out), Box::new(err));
    let local = LocalFs::new();
    let options = batch_options();
    let mut replicator = Replicator::new(&local, &local, &options, &mut reporter);
    assert!(
        replicator
            .run(&scratch.path().join("absent"), Some(&scratch.path().join("dst")))
            .is_err()
    );
}
