//! The per-directory exclusion set.
//!
//! One [`IgnoreList`] exists per directory frame of the replication walk.
//! It serves three callers through a single probe operation, telling them
//! apart by an [`Origin`] tag: patterns authored in the directory's ignore
//! file, names observed while scanning the source listing, and names
//! observed while scanning the destination listing. The tag of the first
//! matching entry decides what the caller does — a destination probe that
//! comes back [`Origin::Destination`] found no source entry and no ignore
//! pattern, so the path is pruned.

use crate::wildmatch::wild_match;
use rustc_hash::FxHashMap;

/// Bytes that mark a pattern as a wildcard rather than a literal name.
pub const WILDCARD_BYTES: &[u8] = b"?*{}[]|";

/// Returns `true` when `pattern` contains any wildcard byte.
#[must_use]
pub fn is_wildcard(pattern: &[u8]) -> bool {
    pattern.iter().any(|b| WILDCARD_BYTES.contains(b))
}

/// Who inserted an entry into the list.
///
/// The numeric order matters only in that probes return the tag of the
/// entry they hit, letting one pass over the destination listing detect
/// "present in destination only".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// Pattern read from the directory's ignore file.
    IgnoreFile,
    /// Name seen while scanning the source directory.
    Source,
    /// Name seen while scanning the destination directory.
    Destination,
}

struct WildEntry {
    pattern: Vec<u8>,
    origin: Origin,
}

/// Two-level pattern index: wildcard patterns in a scan list, literal
/// names in a hash map.
///
/// Only [`Origin::IgnoreFile`] entries match as wildcards; a source or
/// destination file whose name happens to contain `*` is still compared
/// exactly.
#[derive(Default)]
pub struct IgnoreList {
    wildcards: Vec<WildEntry>,
    literals: FxHashMap<Vec<u8>, Origin>,
}

impl IgnoreList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `name`, inserting it with `origin` on a miss.
    ///
    /// Returns the origin of the first matching entry: the wildcard scan
    /// runs first (exact byte equality always counts; glob matching only
    /// for ignore-file patterns probed by other callers), then the
    /// literal bucket. A miss stores the probe itself and echoes
    /// `origin` back.
    pub fn probe(&mut self, name: &[u8], origin: Origin) -> Origin {
        for entry in &self.wildcards {
            if entry.pattern == name
                || (origin != Origin::IgnoreFile
                    && entry.origin == Origin::IgnoreFile
                    && wild_match(&entry.pattern, name))
            {
                return entry.origin;
            }
        }
        if let Some(&found) = self.literals.get(name) {
            return found;
        }
        if is_wildcard(name) {
            self.wildcards.push(WildEntry {
                pattern: name.to_vec(),
                origin,
            });
        } else {
            self.literals.insert(name.to_vec(), origin);
        }
        origin
    }

    /// Returns `true` when the list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wildcards.is_empty() && self.literals.is_empty()
    }
}

impl std::fmt::Debug for IgnoreList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreList")
            .field("wildcards", &self.wildcards.len())
            .field("literals", &self.literals.len())
            .finish()
    }
}

/// Iterates the patterns of an ignore-file body.
///
/// Lines are newline-separated; a trailing carriage return is stripped so
/// files edited on foreign systems still parse. Blank lines and lines
/// starting with `#` are skipped.
pub fn ignore_file_patterns(contents: &[u8]) -> impl Iterator<Item = &[u8]> {
    contents
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty() && line[0] != b'#')
}
