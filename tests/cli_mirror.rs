//! End-to-end mirroring through the compiled binary.

#![cfg(unix)]

mod integration;

use integration::helpers::*;
use std::fs;
use std::os::unix::fs::{MetadataExt, symlink};

#[test]
fn mirrors_a_tree_and_exits_zero() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.path().join("dst");

    test_dir.write_file("src/a.txt", b"alpha").unwrap();
    test_dir.write_file("src/sub/deep.txt", b"deep").unwrap();
    symlink("a.txt", src.join("link")).unwrap();
    fs::hard_link(src.join("a.txt"), src.join("a.hard")).unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.assert_success();

    assert_eq!(test_dir.read_file("dst/a.txt").unwrap(), b"alpha");
    assert_eq!(test_dir.read_file("dst/sub/deep.txt").unwrap(), b"deep");
    assert_eq!(
        fs::read_link(dst.join("link")).unwrap().to_str(),
        Some("a.txt")
    );
    assert_eq!(
        fs::metadata(dst.join("a.txt")).unwrap().ino(),
        fs::metadata(dst.join("a.hard")).unwrap().ino()
    );
}

#[test]
fn prune_honors_the_confirmation_prompt() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.mkdir("dst").unwrap();
    test_dir.write_file("dst/stale", b"old").unwrap();

    // Declining keeps the file.
    let mut cmd = TreedupCommand::new();
    cmd.args([src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.stdin(b"n\n");
    let output = cmd.assert_success();
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("remove"),
        "prompt goes to stderr"
    );
    assert!(test_dir.exists("dst/stale"));

    // Confirming removes it.
    let mut cmd = TreedupCommand::new();
    cmd.args([src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.stdin(b"y\n");
    cmd.assert_success();
    assert!(!test_dir.exists("dst/stale"));
}

#[test]
fn safety_refusal_exits_nonzero() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.mkdir("dst").unwrap();
    test_dir.write_file("src/target", b"file").unwrap();
    test_dir.mkdir("dst/target").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", src.to_str().unwrap(), dst.to_str().unwrap()]);
    let output = cmd.run();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("SAFETY"));
    assert!(dst.join("target").is_dir());

    // With safety off the directory gives way to the file.
    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", "-s0", src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.assert_success();
    assert!(dst.join("target").is_file());
}

#[test]
fn ignore_file_excludes_from_copy_and_prune() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.mkdir("dst").unwrap();
    test_dir
        .write_file("src/.cpignore", b"skip.log\n*.tmp\n")
        .unwrap();
    test_dir.write_file("src/keep.txt", b"keep").unwrap();
    test_dir.write_file("src/skip.log", b"skip").unwrap();
    test_dir.write_file("src/foo.tmp", b"skip").unwrap();
    test_dir.write_file("src/bar.txt", b"keep").unwrap();
    test_dir.write_file("dst/scratch.tmp", b"mine").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", "-x", src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.assert_success();

    assert!(test_dir.exists("dst/keep.txt"));
    assert!(test_dir.exists("dst/bar.txt"));
    assert!(!test_dir.exists("dst/.cpignore"));
    assert!(!test_dir.exists("dst/skip.log"));
    assert!(!test_dir.exists("dst/foo.tmp"));
    assert!(test_dir.exists("dst/scratch.tmp"));
}

#[test]
fn summary_prints_after_a_clean_run() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.path().join("dst");
    test_dir.write_file("src/a", b"aaaa").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", "-I", src.to_str().unwrap(), dst.to_str().unwrap()]);
    let output = cmd.assert_success();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("treedup completed successfully"));
    assert!(stdout.contains("items copied"));
}

#[test]
fn missing_destination_without_md5_refresh_is_an_error() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", src.to_str().unwrap()]);
    let output = cmd.run();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no destination"));
}

#[test]
fn md5_refresh_runs_without_a_destination() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    test_dir.write_file("src/a", b"alpha").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", "-m", src.to_str().unwrap()]);
    cmd.assert_success();
    assert!(test_dir.exists("src/.MD5.CHECKSUMS"));
}

#[test]
fn second_run_changes_nothing() {
    let test_dir = TestDir::new().expect("create test dir");
    let src = test_dir.mkdir("src").unwrap();
    let dst = test_dir.path().join("dst");
    test_dir.write_file("src/a", b"alpha").unwrap();
    test_dir.write_file("src/d/b", b"beta").unwrap();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", src.to_str().unwrap(), dst.to_str().unwrap()]);
    cmd.assert_success();

    let before = fs::metadata(dst.join("a")).unwrap().ino();

    let mut cmd = TreedupCommand::new();
    cmd.args(["-i0", "-I", src.to_str().unwrap(), dst.to_str().unwrap()]);
    let output = cmd.assert_success();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("0 items copied 0 things deleted"),
        "summary: {stdout}"
    );
    // The file was not replaced.
    assert_eq!(fs::metadata(dst.join("a")).unwrap().ino(), before);
}
