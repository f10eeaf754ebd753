//! Byte and item counters for the end-of-run summary.

/// Monotonic totals accumulated over a replication run.
///
/// Byte counts for regular files are block-based (allocated blocks,
/// discounting the final partial block), matching what the summary has
/// always reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Bytes present at the source.
    pub source_bytes: u64,
    /// Objects examined at the source.
    pub source_items: u64,
    /// Objects created or relinked at the destination.
    pub copied_items: u64,
    /// Bytes read from either side.
    pub read_bytes: u64,
    /// Bytes written to the destination.
    pub written_bytes: u64,
    /// Objects removed from the destination.
    pub removed_items: u64,
}
