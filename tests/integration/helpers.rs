//! Scratch-tree and command helpers for driving the `treedup` binary.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Temporary directory that cleans up on drop.
pub struct TestDir {
    dir: tempfile::TempDir,
}

impl TestDir {
    /// Creates a fresh scratch directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Root of the scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates a subdirectory and returns its path.
    pub fn mkdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.path().join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Writes a file under the scratch directory, creating parents.
    pub fn write_file(&self, relative: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Reads a file back.
    pub fn read_file(&self, relative: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path().join(relative))
    }

    /// Whether a relative path exists (without following symlinks).
    pub fn exists(&self, relative: &str) -> bool {
        self.path().join(relative).symlink_metadata().is_ok()
    }
}

/// Builder around an invocation of the compiled binary.
pub struct TreedupCommand {
    command: Command,
    stdin: Option<Vec<u8>>,
}

impl TreedupCommand {
    /// Points at the binary Cargo built for this test run.
    pub fn new() -> Self {
        Self {
            command: Command::new(env!("CARGO_BIN_EXE_treedup")),
            stdin: None,
        }
    }

    /// Appends arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Supplies bytes on standard input (for confirmation prompts).
    pub fn stdin(&mut self, bytes: &[u8]) -> &mut Self {
        self.stdin = Some(bytes.to_vec());
        self
    }

    /// Runs to completion and captures output.
    pub fn run(&mut self) -> Output {
        self.command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.command.spawn().expect("spawn treedup");
        let input = self.stdin.take().unwrap_or_default();
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(&input)
            .expect("feed stdin");
        child.wait_with_output().expect("wait for treedup")
    }

    /// Runs and asserts a zero exit, returning the output.
    pub fn assert_success(&mut self) -> Output {
        let output = self.run();
        assert!(
            output.status.success(),
            "treedup failed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        output
    }
}

impl Default for TreedupCommand {
    fn default() -> Self {
        Self::new()
    }
}
