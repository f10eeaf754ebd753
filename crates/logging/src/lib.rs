#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `logging` provides the line-oriented diagnostic plumbing shared by the
//! treedup workspace. Progress lines go to standard output gated by a
//! numeric [`Verbosity`] level; failures go to standard error
//! unconditionally. Both streams are wrapped in a [`MessageSink`] so tests
//! can capture output by substituting an in-memory writer.
//!
//! # Design
//!
//! [`MessageSink`] is a lightweight wrapper around an
//! [`io::Write`](std::io::Write) implementor. Callers control whether a
//! rendered line ends with a newline by selecting a [`LineMode`];
//! confirmation prompts are the one place that writes without one.
//! [`Reporter`] bundles the two sinks with the verbosity gate and offers
//! the fixed-width per-path event format used throughout the replication
//! core.

mod verbosity;

pub use verbosity::Verbosity;

use std::fmt::Display;
use std::io::{self, Write};
use std::path::Path;

/// Controls whether a [`MessageSink`] appends a trailing newline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LineMode {
    /// Append a newline terminator after each rendered line.
    #[default]
    WithNewline,
    /// Emit the rendered text without a trailing newline.
    WithoutNewline,
}

impl LineMode {
    const fn append_newline(self) -> bool {
        matches!(self, Self::WithNewline)
    }
}

/// Streaming sink that renders diagnostic lines into an
/// [`io::Write`](std::io::Write) target.
#[derive(Debug)]
pub struct MessageSink<W> {
    writer: W,
    line_mode: LineMode,
}

impl<W> MessageSink<W> {
    /// Creates a sink that appends a newline after each rendered line.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self::with_line_mode(writer, LineMode::WithNewline)
    }

    /// Creates a sink with the provided [`LineMode`].
    #[must_use]
    pub fn with_line_mode(writer: W, line_mode: LineMode) -> Self {
        Self { writer, line_mode }
    }

    /// Mutably borrows the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consumes the sink and returns the wrapped writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MessageSink<W> {
    /// Writes a single rendered line to the underlying writer.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        if self.line_mode.append_newline() {
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Bundles the standard and error sinks with the verbosity gate.
///
/// Write failures on the diagnostic streams are swallowed: a mirror run
/// must not abort because its progress pipe went away.
pub struct Reporter {
    verbosity: Verbosity,
    quiet: bool,
    out: MessageSink<Box<dyn Write>>,
    err: MessageSink<Box<dyn Write>>,
}

impl Reporter {
    /// Creates a reporter over process stdout/stderr.
    #[must_use]
    pub fn stdio(verbosity: Verbosity, quiet: bool) -> Self {
        Self::with_sinks(
            verbosity,
            quiet,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    /// Creates a reporter over caller-supplied writers.
    #[must_use]
    pub fn with_sinks(
        verbosity: Verbosity,
        quiet: bool,
        out: Box<dyn Write>,
        err: Box<dyn Write>,
    ) -> Self {
        Self {
            verbosity,
            quiet,
            out: MessageSink::new(out),
            err: MessageSink::new(err),
        }
    }

    /// Returns the configured verbosity.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Returns `true` when non-error output is suppressed.
    #[must_use]
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Emits a per-path progress event at the given verbosity level.
    ///
    /// The path is left-aligned in a 32-column field, matching the
    /// fixed-width event log the tool has always produced.
    pub fn file_event(&mut self, level: i32, path: &Path, what: &str) {
        if self.verbosity.at_least(level) {
            let _ = self
                .out
                .write_line(&format!("{:<32} {}", path.display(), what));
        }
    }

    /// Emits an unconditional line on standard output unless quiet.
    pub fn info(&mut self, text: impl Display) {
        if !self.quiet {
            let _ = self.out.write_line(&text.to_string());
        }
    }

    /// Emits a per-path failure on standard error.
    pub fn error(&mut self, path: &Path, what: impl Display) {
        let _ = self
            .err
            .write_line(&format!("{:<32} {}", path.display(), what));
    }

    /// Emits a bare line on standard error.
    pub fn error_line(&mut self, text: impl Display) {
        let _ = self.err.write_line(&text.to_string());
    }

    /// Writes a prompt (no newline) to standard error and flushes it.
    pub fn prompt(&mut self, text: impl Display) {
        let _ = self.err.get_mut().write_all(text.to_string().as_bytes());
        let _ = self.err.flush();
    }

    /// Flushes the standard output sink.
    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("verbosity", &self.verbosity)
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}
