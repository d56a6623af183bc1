//! Dense set of u64 values stored as inclusive intervals
//!
//! Pools track removed snapshots here; long runs of consecutive ids collapse
//! to a single entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A set of `u64` values represented as merged inclusive intervals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet {
    /// start -> end, inclusive on both sides, non-overlapping, non-adjacent
    ranges: BTreeMap<u64, u64>,
}

impl IntervalSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set contains no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of stored intervals (not values)
    #[must_use]
    pub fn num_intervals(&self) -> usize {
        self.ranges.len()
    }

    /// Whether `value` is in the set
    #[must_use]
    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, &end)| value <= end)
    }

    /// Insert a single value, merging with neighboring intervals
    pub fn insert(&mut self, value: u64) {
        if self.contains(value) {
            return;
        }

        let mut start = value;
        let mut end = value;

        // absorb an interval ending right before us
        if let Some((&s, &e)) = self.ranges.range(..value).next_back() {
            if e + 1 == value {
                start = s;
                self.ranges.remove(&s);
            }
        }

        // absorb an interval starting right after us
        if value < u64::MAX {
            if let Some(&e) = self.ranges.get(&(value + 1)) {
                end = e;
                self.ranges.remove(&(value + 1));
            }
        }

        self.ranges.insert(start, end);
    }

    /// Largest value in the set, if any
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        self.ranges.values().next_back().copied()
    }

    /// Iterate over the stored `(start, end)` intervals in order
    pub fn intervals(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&s, &e)| (s, e))
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, e)) in self.intervals().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if s == e {
                write!(f, "{s}")?;
            } else {
                write!(f, "{s}-{e}")?;
            }
        }
        write!(f, "]")
    }
}
