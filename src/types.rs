//! Core types used throughout the cache client.

use serde::{Deserialize, Serialize};

/// Caller-supplied token returned when a pipelined mutation commits.
pub type MutationId = String;

/// A value together with the score that orders it inside a scored collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry<T> {
    /// Ordering score; ascending by default.
    pub score: f64,
    /// The stored value.
    pub value: T,
}

impl<T> ScoredEntry<T> {
    /// Create a new scored entry.
    pub fn new(score: f64, value: T) -> Self {
        Self { score, value }
    }

    /// Transform the value while keeping the score.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ScoredEntry<U> {
        ScoredEntry {
            score: self.score,
            value: f(self.value),
        }
    }

    /// Fallible variant of [`ScoredEntry::map`].
    pub fn try_map<U, E, F: FnOnce(T) -> Result<U, E>>(self, f: F) -> Result<ScoredEntry<U>, E> {
        Ok(ScoredEntry {
            score: self.score,
            value: f(self.value)?,
        })
    }

    /// Consume the entry, returning the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Position window over a scored collection.
///
/// Indices follow the store's native semantics: 0-based, inclusive, and
/// negative values count back from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeSpec {
    /// First position.
    pub start: i64,
    /// Last position (inclusive).
    pub end: i64,
    /// Walk from the highest score down instead of the lowest up.
    pub reversed: bool,
}

impl RangeSpec {
    /// Ascending window `[start, end]`.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            reversed: false,
        }
    }

    /// Descending window `[start, end]`.
    pub fn reversed(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            reversed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_entry_map() {
        let entry = ScoredEntry::new(1.5, "7");
        let parsed = entry.try_map(|v| v.parse::<u32>()).unwrap();
        assert_eq!(parsed, ScoredEntry::new(1.5, 7));
        assert_eq!(parsed.map(|v| v * 2).into_value(), 14);
    }

    #[test]
    fn test_range_spec() {
        assert!(!RangeSpec::new(0, -1).reversed);
        assert!(RangeSpec::reversed(0, 1).reversed);
    }
}
