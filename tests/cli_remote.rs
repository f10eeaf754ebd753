//! Slave-mode protocol service through the real binary.
//!
//! Drives `treedup -S` the way a remote client would — over its standard
//! streams — using the in-process wire client.

#![cfg(unix)]

mod integration;

use integration::helpers::TestDir;
use std::io::BufReader;
use std::process::{Command, Stdio};

use hostfs::{FileKind, HostFs, RemoteFs};

fn spawn_slave() -> RemoteFs {
    let mut child = Command::new(env!("CARGO_BIN_EXE_treedup"))
        .arg("-S")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn treedup -S");
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    RemoteFs::over(Box::new(BufReader::new(stdout)), Box::new(stdin), Some(child))
        .expect("handshake with slave")
}

#[test]
fn slave_answers_stat_requests() {
    let test_dir = TestDir::new().expect("create test dir");
    test_dir.write_file("probe", b"twelve bytes").unwrap();

    let remote = spawn_slave();
    let stat = remote.lstat(&test_dir.path().join("probe")).expect("lstat");
    assert_eq!(stat.kind(), FileKind::Regular);
    assert_eq!(stat.size, 12);
}

#[test]
fn slave_creates_and_lists_entries() {
    let test_dir = TestDir::new().expect("create test dir");

    let remote = spawn_slave();
    remote
        .mkdir(&test_dir.path().join("made"), 0o755)
        .expect("mkdir");

    use std::io::Write;
    let mut writer = remote
        .create_writer(&test_dir.path().join("made/file"), 0o644)
        .expect("create");
    writer.write_all(b"over the wire").expect("write");
    drop(writer);

    assert_eq!(
        test_dir.read_file("made/file").unwrap(),
        b"over the wire"
    );

    let names = remote.read_dir(test_dir.path()).expect("read_dir");
    assert_eq!(names, vec!["made"]);
}
