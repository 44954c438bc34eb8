//! Rank strings: the sortable multi-segment keys that order tickets within a column.
//!
//! A rank is a sequence of non-negative integer segments separated by `.`
//! (`"1"`, `"1.5"`, `"3.0.2"`). Ranks compare segment by segment and a missing
//! trailing segment counts as `0`, so `"1"` and `"1.0"` are the same rank. The
//! parsed form drops trailing zero segments so each rank has one spelling.
//!
//! [`Rank::between`] always finds room between two distinct ranks. When the
//! first differing segments are adjacent integers it goes one segment deeper
//! instead of producing a fraction:
//!
//! ```
//! use boardsync_common::rank::Rank;
//!
//! let a: Rank = "1".parse().unwrap();
//! let b: Rank = "2".parse().unwrap();
//! let mid = Rank::between(&a, &b).unwrap();
//! assert_eq!(mid.to_string(), "1.5");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Segment separator in the string form.
pub const SEPARATOR: char = '.';

/// Virtual upper bound used when a deeper segment has to be invented.
///
/// Deeper segments are split as if they were decimal digits, which keeps
/// generated ranks short (`1.5`, `1.7`, `1.8`, `1.9`, `1.9.5`, ...).
const DEEP_RADIX: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
    #[error("Malformed rank '{0}'")]
    Malformed(String),

    #[error("Cannot insert between equal ranks '{0}'")]
    Equal(String),

    #[error("Ranks out of order: '{low}' is not below '{high}'")]
    Unordered { low: String, high: String },

    #[error("No rank exists before '{0}'")]
    NoRoomBefore(String),
}

/// A parsed rank string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rank(Vec<u64>);

impl Rank {
    /// Rank given to the first ticket of an empty column.
    pub fn first() -> Self {
        Self(vec![1])
    }

    fn zero() -> Self {
        Self(vec![0])
    }

    /// Build a rank from raw segments, normalizing trailing zeros away.
    pub fn from_segments(segments: Vec<u64>) -> Self {
        let mut segments = segments;
        while segments.len() > 1 && segments.last() == Some(&0) {
            segments.pop();
        }
        if segments.is_empty() {
            segments.push(0);
        }
        Self(segments)
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    /// Segment at `index`, with missing trailing segments read as `0`.
    fn segment(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Total order over ranks; missing trailing segments compare as `0`.
    pub fn compare(&self, other: &Rank) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// A rank strictly greater than `last`.
    ///
    /// Normally just the next integer; a saturated segment is kept and the
    /// increment moves one segment deeper.
    pub fn after(last: &Rank) -> Self {
        let mut out = Vec::new();
        let mut depth = 0;
        loop {
            let seg = last.segment(depth);
            match seg.checked_add(1) {
                Some(next) => {
                    out.push(next);
                    return Self::from_segments(out);
                }
                None => {
                    out.push(seg);
                    depth += 1;
                }
            }
        }
    }

    /// A rank strictly smaller than `first`.
    ///
    /// Fails only when `first` is the all-zero rank, below which nothing sorts.
    pub fn before(first: &Rank) -> Result<Self, RankError> {
        let zero = Self::zero();
        if first.compare(&zero).is_eq() {
            return Err(RankError::NoRoomBefore(first.to_string()));
        }
        Self::between(&zero, first)
    }

    /// A rank strictly between `low` and `high`.
    ///
    /// Equal or inverted inputs mean the caller let two tickets share a
    /// position, which is a bug on the caller's side; they are reported as
    /// errors rather than papered over.
    pub fn between(low: &Rank, high: &Rank) -> Result<Self, RankError> {
        match low.compare(high) {
            Ordering::Equal => return Err(RankError::Equal(low.to_string())),
            Ordering::Greater => {
                return Err(RankError::Unordered {
                    low: low.to_string(),
                    high: high.to_string(),
                });
            }
            Ordering::Less => {}
        }

        // First index where the two ranks differ; low is smaller there.
        let mut index = 0;
        while low.segment(index) == high.segment(index) {
            index += 1;
        }

        let mut out: Vec<u64> = (0..index).map(|i| low.segment(i)).collect();
        let (lo, hi) = (low.segment(index), high.segment(index));
        if hi - lo >= 2 {
            out.push(lo + (hi - lo) / 2);
            return Ok(Self::from_segments(out));
        }

        // Adjacent integers: keep low's segment and find room deeper down,
        // where only low bounds us from below.
        out.push(lo);
        let mut depth = index + 1;
        loop {
            let seg = low.segment(depth);
            if seg.saturating_add(2) <= DEEP_RADIX {
                out.push(seg + (DEEP_RADIX - seg) / 2);
                return Ok(Self::from_segments(out));
            }
            out.push(seg);
            depth += 1;
        }
    }

    /// Rank for a slot bounded by optional neighbours.
    ///
    /// `(None, None)` is an empty column, `(Some, None)` appends after the
    /// last ticket, `(None, Some)` inserts before the first.
    pub fn between_neighbours(low: Option<&Rank>, high: Option<&Rank>) -> Result<Self, RankError> {
        match (low, high) {
            (None, None) => Ok(Self::first()),
            (Some(low), None) => Ok(Self::after(low)),
            (None, Some(high)) => Self::before(high),
            (Some(low), Some(high)) => Self::between(low, high),
        }
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::first()
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.0 {
            if !first {
                write!(f, "{}", SEPARATOR)?;
            }
            write!(f, "{}", seg)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Rank {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split(SEPARATOR)
            .map(|seg| {
                if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                seg.parse::<u64>().ok()
            })
            .collect::<Option<Vec<u64>>>()
            .ok_or_else(|| RankError::Malformed(s.to_string()))?;
        Ok(Self::from_segments(segments))
    }
}

impl TryFrom<String> for Rank {
    type Error = RankError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.to_string()
    }
}
