//! Gap-based sort ordering.
//!
//! Entries are kept in increments of 10 so a new entry fits between two
//! neighbors without renumbering. When the gap between two neighbors is
//! exhausted, the whole sibling set is renumbered 10, 20, 30, … and the
//! insertion is retried.

pub const STEP: i64 = 10;

/// Sort order for an entry appended after the current maximum.
pub fn append_after(current_max: Option<i64>) -> i64 {
    current_max.unwrap_or(0) + STEP
}

/// An integer strictly between `lo` and `hi`, if one exists.
pub fn midpoint(lo: i64, hi: i64) -> Option<i64> {
    (hi - lo >= 2).then(|| lo + (hi - lo) / 2)
}

/// Fresh orders for a renumbered sibling set: 10, 20, 30, …
pub fn renumbered(len: usize) -> impl Iterator<Item = i64> {
    (1..=len as i64).map(|i| i * STEP)
}
