//! `treedup` — mirror a source tree onto a destination, exactly.
//!
//! Duplicates the source as closely as the destination filesystem
//! allows: modify times, ownership, permissions, flags, softlinks,
//! devices, and hardlink topology all carry over, and destination
//! entries with no source counterpart are removed. Either side may be
//! remote (`[user@]host:path`), reached over ssh with the peer running
//! `treedup -S`.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use engine::{Options, Replicator, Stats};
use hostfs::{HostFs, LocalFs, RemoteFs, slave};
use logging::{Reporter, Verbosity};

#[derive(Debug, Parser)]
#[command(
    name = "treedup",
    version,
    about = "Mirror a source tree onto a destination, preserving links, devices, and metadata",
    after_help = "Either operand may name a remote endpoint as [user@]host:path.\n\
                  A run returns 0 only when the destination fully reflects the source."
)]
struct Cli {
    /// Compare and copy content even when metadata agrees.
    #[arg(short = 'f')]
    force: bool,

    /// Increase per-file progress output (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output.
    #[arg(short = 'q')]
    quiet: bool,

    /// Print a transfer summary at the end of a clean run.
    #[arg(short = 'I')]
    summary: bool,

    /// Never delete anything at the destination.
    #[arg(short = 'o')]
    no_remove: bool,

    /// Ask for confirmation before deletions (-i0 disables).
    #[arg(short = 'i', value_name = "0|1", default_value_t = 1)]
    interactive: u8,

    /// Refuse to replace a destination directory with a file (-s0 disables).
    #[arg(short = 's', value_name = "0|1", default_value_t = 1)]
    safety: u8,

    /// Honor per-directory `.cpignore` exclusion files.
    #[arg(short = 'x')]
    cpignore: bool,

    /// Honor per-directory exclusion files with this name.
    #[arg(short = 'X', value_name = "FILE")]
    ignore_file: Option<OsString>,

    /// Hardlink unchanged files from this prior snapshot instead of copying.
    #[arg(short = 'H', value_name = "PATH")]
    hardlink_base: Option<PathBuf>,

    /// Enable MD5 checking against `.MD5.CHECKSUMS` caches.
    #[arg(short = 'm')]
    md5: bool,

    /// Enable MD5 checking with this cache file name.
    #[arg(short = 'M', value_name = "FILE")]
    md5_file: Option<OsString>,

    /// Enable filesystem-content-id checking against `.FSMID.CHECK` caches.
    #[arg(short = 'k')]
    fsmid: bool,

    /// Enable filesystem-content-id checking with this cache file name.
    #[arg(short = 'K', value_name = "FILE")]
    fsmid_file: Option<OsString>,

    /// Serve the remote protocol on stdin/stdout and do no copying.
    #[arg(short = 'S')]
    slave: bool,

    /// Source tree, `[user@]host:path` for a remote source.
    source: Option<String>,

    /// Destination tree, `[user@]host:path` for a remote destination.
    destination: Option<String>,
}

/// One side of the transfer: where it lives and the path there.
#[derive(Debug, Eq, PartialEq)]
struct Operand {
    target: Option<String>,
    path: PathBuf,
}

impl Operand {
    /// Splits `[user@]host:path` at the first colon; no colon means a
    /// local path.
    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((host, path)) if !host.is_empty() => Self {
                target: Some(host.to_string()),
                path: PathBuf::from(path),
            },
            _ => Self {
                target: None,
                path: PathBuf::from(raw),
            },
        }
    }

    fn is_remote(&self) -> bool {
        self.target.is_some()
    }
}

enum Host {
    Local(LocalFs),
    Remote(RemoteFs),
}

impl Host {
    fn connect(operand: &Operand) -> Result<Self, String> {
        match &operand.target {
            None => Ok(Self::Local(LocalFs::new())),
            Some(target) => RemoteFs::connect(target, "treedup")
                .map(Self::Remote)
                .map_err(|error| format!("unable to connect to {target}: {error}")),
        }
    }

    fn as_fs(&self) -> &dyn HostFs {
        match self {
            Self::Local(local) => local,
            Self::Remote(remote) => remote,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.slave {
        return match slave::serve(io::stdin().lock(), io::stdout().lock()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("treedup: slave channel failed: {error}");
                ExitCode::FAILURE
            }
        };
    }

    match run(cli) {
        Ok(failures) if failures == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(message) => {
            eprintln!("treedup: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<u64, String> {
    let started = Instant::now();

    let source = cli
        .source
        .as_deref()
        .map(Operand::parse)
        .ok_or_else(|| "no source specified".to_string())?;
    let destination = cli.destination.as_deref().map(Operand::parse);

    let ignore_file = cli
        .ignore_file
        .clone()
        .or_else(|| cli.cpignore.then(|| OsString::from(".cpignore")));
    let md5_cache_file = cli
        .md5_file
        .clone()
        .or_else(|| cli.md5.then(|| OsString::from(".MD5.CHECKSUMS")));
    let fsmid_cache_file = cli
        .fsmid_file
        .clone()
        .or_else(|| cli.fsmid.then(|| OsString::from(".FSMID.CHECK")));

    // A missing destination is only meaningful for a digest refresh.
    if destination.is_none() && md5_cache_file.is_none() {
        return Err("no destination specified (only an MD5 refresh may omit it)".to_string());
    }

    if source.is_remote() && ignore_file.is_some() {
        return Err("exclusion files are not supported for remote sources".to_string());
    }
    if source.is_remote() && md5_cache_file.is_some() {
        return Err("MD5 checking is not supported for remote sources".to_string());
    }
    if destination.as_ref().is_some_and(Operand::is_remote) && fsmid_cache_file.is_some() {
        return Err("fsmid checking is not supported for remote destinations".to_string());
    }

    let src_host = Host::connect(&source)?;
    let dst_host = match &destination {
        Some(destination) => Host::connect(destination)?,
        None => Host::Local(LocalFs::new()),
    };

    let options = Options {
        force: cli.force,
        safety: cli.safety != 0,
        ask_confirmation: cli.interactive != 0,
        no_remove: cli.no_remove,
        quiet: cli.quiet,
        verbose: i32::from(cli.verbose),
        ignore_file,
        md5_cache_file,
        fsmid_cache_file,
        hardlink_base: cli.hardlink_base.clone(),
    };

    let mut reporter = Reporter::stdio(Verbosity(options.verbose), options.quiet);
    let mut replicator = Replicator::new(src_host.as_fs(), dst_host.as_fs(), &options, &mut reporter);

    let failures = replicator
        .run(&source.path, destination.as_ref().map(|d| d.path.as_path()))
        .map_err(|error| error.to_string())?;

    if cli.summary && failures == 0 {
        print_summary(replicator.stats(), started);
    }
    Ok(failures)
}

fn print_summary(stats: &Stats, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let moved = (stats.read_bytes + stats.written_bytes).max(1);

    println!("treedup completed successfully");
    println!(
        "{} bytes source {} bytes read {} bytes written ({:.1}X speedup)",
        stats.source_bytes,
        stats.read_bytes,
        stats.written_bytes,
        (stats.source_bytes as f64 * 2.0) / moved as f64,
    );
    println!(
        "{} source items {} items copied {} things deleted",
        stats.source_items, stats.copied_items, stats.removed_items,
    );
    println!(
        "{:.1} seconds {:5} Kbytes/sec synced {:5} Kbytes/sec scanned",
        elapsed,
        (moved as f64 / elapsed / 1024.0) as u64,
        (stats.source_bytes as f64 / elapsed / 1024.0) as u64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_without_colon_is_local() {
        let operand = Operand::parse("/some/path");
        assert_eq!(operand.target, None);
        assert_eq!(operand.path, PathBuf::from("/some/path"));
    }

    #[test]
    fn operand_with_host_is_remote() {
        let operand = Operand::parse("backup@mirror:/srv/tree");
        assert_eq!(operand.target.as_deref(), Some("backup@mirror"));
        assert_eq!(operand.path, PathBuf::from("/srv/tree"));
    }

    #[test]
    fn leading_colon_stays_local() {
        let operand = Operand::parse(":odd");
        assert_eq!(operand.target, None);
        assert_eq!(operand.path, PathBuf::from(":odd"));
    }

    #[test]
    fn cli_defaults_keep_rails_on() {
        let cli = Cli::parse_from(["treedup", "src", "dst"]);
        assert_eq!(cli.interactive, 1);
        assert_eq!(cli.safety, 1);
        assert!(!cli.force);
    }

    #[test]
    fn attached_values_parse_like_the_old_tool() {
        let cli = Cli::parse_from(["treedup", "-i0", "-s0", "-vv", "src", "dst"]);
        assert_eq!(cli.interactive, 0);
        assert_eq!(cli.safety, 0);
        assert_eq!(cli.verbose, 2);
    }
}
