//! Shell-style glob matching for exclusion patterns.
//!
//! Only `?` and `*` are special: `?` matches exactly one byte, `*` matches
//! any possibly-empty run. Everything else matches literally. Patterns and
//! names are compared as raw bytes so non-UTF-8 file names behave the same
//! as they do in directory listings.

/// Returns `true` when `name` matches the glob `pattern`.
///
/// The match is anchored at both ends: the pattern must consume the whole
/// name. `*` is handled by recursing at every possible continuation
/// offset, with the common trailing-`*` case short-circuited.
#[must_use]
pub fn wild_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=name.len()).any(|skip| wild_match(rest, &name[skip..]))
        }
        Some((b'?', rest)) => match name.split_first() {
            Some((_, name_rest)) => wild_match(rest, name_rest),
            None => false,
        },
        Some((ch, rest)) => match name.split_first() {
            Some((name_ch, name_rest)) => ch == name_ch && wild_match(rest, name_rest),
            None => false,
        },
    }
}
