/// Numeric verbosity level controlling per-file progress output.
///
/// Level 0 is silent apart from errors; each additional level unlocks
/// chattier progress lines (directory entry at 2, unchanged files at 3).
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Verbosity(pub i32);

impl Verbosity {
    /// Returns `true` when the configured level is at least `level`.
    #[must_use]
    pub const fn at_least(self, level: i32) -> bool {
        self.0 >= level
    }
}

impl From<i32> for Verbosity {
    fn from(level: i32) -> Self {
        Self(level)
    }
}
