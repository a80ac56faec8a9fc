//! Transaction-number interval algebra
//!
//! Intervals are half-open `[start, stop)` like MySQL's `rpl_gtid.h`,
//! while the textual form is the closed `n` / `n-m` that `gtid_executed`
//! prints. Interval slices are kept normalized: sorted by start, pairwise
//! disjoint, adjacent runs merged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Half-open `[start, stop)` range of transaction numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    /// First transaction number of this interval.
    pub start: i64,
    /// First transaction number after this interval.
    pub stop: i64,
}

impl Interval {
    /// Creates an interval, validating `stop > start`.
    pub fn new(start: i64, stop: i64) -> Result<Self> {
        if stop <= start {
            return Err(Error::InvalidFormat(format!(
                "invalid interval [{start}, {stop}), stop must be > start"
            )));
        }
        Ok(Interval { start, stop })
    }
}

impl FromStr for Interval {
    type Err = Error;

    /// Parses the closed textual form: `"n"` is `[n, n+1)`, `"n-m"` is
    /// `[n, m+1)`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFormat(format!("invalid interval {s:?}, must be n[-n]"));

        let mut parts = s.splitn(2, '-');
        let start: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let stop = match parts.next() {
            Some(p) => p.parse::<i64>().map_err(|_| invalid())? + 1,
            None => start + 1,
        };

        if stop <= start {
            return Err(Error::InvalidFormat(format!(
                "invalid interval {s:?}, end must be >= start"
            )));
        }

        Ok(Interval { start, stop })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stop == self.start + 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.stop - 1)
        }
    }
}

/// Ordered sequence of intervals.
///
/// All set-algebra operations assume (and re-establish) the normalized
/// form; [`IntervalSlice::normalize`] is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSlice(Vec<Interval>);

impl IntervalSlice {
    /// Creates an empty slice.
    pub fn new() -> Self {
        IntervalSlice(Vec::new())
    }

    /// Whether no transaction number is covered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Intervals as a slice.
    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    /// Appends an interval without normalizing; callers batch pushes and
    /// normalize once.
    pub fn push(&mut self, interval: Interval) {
        self.0.push(interval);
    }

    /// Returns the normalized equivalent: sorted, disjoint, with touching
    /// intervals merged.
    pub fn normalize(&self) -> IntervalSlice {
        if self.0.is_empty() {
            return IntervalSlice::new();
        }

        let mut sorted = self.0.clone();
        sorted.sort();

        let mut n: Vec<Interval> = Vec::with_capacity(sorted.len());
        n.push(sorted[0]);
        for iv in &sorted[1..] {
            match n.last_mut() {
                Some(last) if iv.start <= last.stop => last.stop = last.stop.max(iv.stop),
                _ => n.push(*iv),
            }
        }

        IntervalSlice(n)
    }

    /// Inserts an interval into a normalized slice, merging overlapping and
    /// touching neighbors with a single scan from the end.
    pub fn insert_interval(&mut self, interval: Interval) {
        let s = &mut self.0;
        s.push(interval);

        let total = s.len();
        let mut count = 0usize;
        let mut i = total - 1;
        while i > 0 {
            if s[i].stop < s[i - 1].start {
                s.swap(i, i - 1);
            } else if s[i].start > s[i - 1].stop {
                break;
            } else {
                s[i - 1].start = s[i - 1].start.min(s[i].start);
                s[i - 1].stop = s[i - 1].stop.max(s[i].stop);
                count += 1;
            }
            i -= 1;
        }

        if count > 0 {
            i += 1;
            if i + count < total {
                s.copy_within(i + count..total, i);
            }
            s.truncate(total - count);
        }
    }

    /// Whether every point covered by `sub` is covered by `self`. Both
    /// sides must be normalized.
    pub fn contain(&self, sub: &IntervalSlice) -> bool {
        let s = &self.0;
        let mut j = 0;
        for iv in &sub.0 {
            while j < s.len() && iv.start > s[j].stop {
                j += 1;
            }
            if j == s.len() {
                return false;
            }
            if iv.start < s[j].start || iv.stop > s[j].stop {
                return false;
            }
        }
        true
    }

    /// Set-difference `self \ other`; both sides normalized, result
    /// normalized.
    ///
    /// Two cursors walk minuend and subtrahend; each minuend interval
    /// survives as zero, one, or two pieces depending on how the current
    /// subtrahend overlaps it.
    pub fn minus(&self, other: &IntervalSlice) -> IntervalSlice {
        let sub = other.normalize();
        let mut n: Vec<Interval> = Vec::new();

        let mut i = 0;
        let mut j = 0;
        // Remainder of self.0[i] after trims by already-consumed subtrahends.
        let mut cur: Option<Interval> = None;

        while i < self.0.len() {
            let minuend = cur.take().unwrap_or(self.0[i]);
            let subtrahend = sub.0.get(j).copied().unwrap_or(Interval {
                start: i64::MAX,
                stop: i64::MAX,
            });

            if minuend.stop <= subtrahend.start {
                // disjoint, minuend on the left
                n.push(minuend);
                i += 1;
            } else if minuend.start >= subtrahend.stop {
                // disjoint, minuend on the right
                cur = Some(minuend);
                j += 1;
            } else if minuend.start < subtrahend.start && minuend.stop <= subtrahend.stop {
                // left overhang survives
                n.push(Interval {
                    start: minuend.start,
                    stop: subtrahend.start,
                });
                i += 1;
            } else if minuend.start >= subtrahend.start && minuend.stop > subtrahend.stop {
                // right overhang remains in play against later subtrahends
                cur = Some(Interval {
                    start: subtrahend.stop,
                    stop: minuend.stop,
                });
                j += 1;
            } else if minuend.start >= subtrahend.start && minuend.stop <= subtrahend.stop {
                // fully covered
                i += 1;
            } else {
                // split: left part survives, right part remains in play
                n.push(Interval {
                    start: minuend.start,
                    stop: subtrahend.start,
                });
                cur = Some(Interval {
                    start: subtrahend.stop,
                    stop: minuend.stop,
                });
                j += 1;
            }
        }

        IntervalSlice(n).normalize()
    }
}

impl From<Vec<Interval>> for IntervalSlice {
    fn from(intervals: Vec<Interval>) -> Self {
        IntervalSlice(intervals)
    }
}

impl<'a> IntoIterator for &'a IntervalSlice {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: i64, stop: i64) -> Interval {
        Interval { start, stop }
    }

    fn slice(ivs: &[(i64, i64)]) -> IntervalSlice {
        IntervalSlice(ivs.iter().map(|&(a, b)| iv(a, b)).collect())
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!("1-5".parse::<Interval>().unwrap(), iv(1, 6));
        assert_eq!("3".parse::<Interval>().unwrap(), iv(3, 4));
        assert!("5-1".parse::<Interval>().is_err());
        assert!("".parse::<Interval>().is_err());
        assert!("a-b".parse::<Interval>().is_err());
        assert!("1-2-3".parse::<Interval>().is_err());
    }

    #[test]
    fn test_interval_string() {
        assert_eq!(iv(1, 6).to_string(), "1-5");
        assert_eq!(iv(3, 4).to_string(), "3");
    }

    #[test]
    fn test_parse_round_trip() {
        for interval in [iv(1, 2), iv(1, 100), iv(42, 43)] {
            assert_eq!(
                interval.to_string().parse::<Interval>().unwrap(),
                interval
            );
        }
    }

    #[test]
    fn test_normalize() {
        let n = slice(&[(1, 3), (2, 5), (7, 8), (8, 9)]).normalize();
        assert_eq!(n, slice(&[(1, 5), (7, 9)]));

        // touching intervals merge
        let n = slice(&[(1, 2), (2, 3)]).normalize();
        assert_eq!(n, slice(&[(1, 3)]));

        // idempotent
        assert_eq!(n.normalize(), n);

        assert_eq!(IntervalSlice::new().normalize(), IntervalSlice::new());
    }

    #[test]
    fn test_insert_interval() {
        let mut s = slice(&[(1, 3), (5, 7)]);
        s.insert_interval(iv(3, 5));
        assert_eq!(s, slice(&[(1, 7)]));

        let mut s = slice(&[(1, 3), (5, 7)]);
        s.insert_interval(iv(9, 10));
        assert_eq!(s, slice(&[(1, 3), (5, 7), (9, 10)]));

        let mut s = slice(&[(5, 7)]);
        s.insert_interval(iv(1, 2));
        assert_eq!(s, slice(&[(1, 2), (5, 7)]));

        let mut s = IntervalSlice::new();
        s.insert_interval(iv(4, 5));
        assert_eq!(s, slice(&[(4, 5)]));
    }

    #[test]
    fn test_contain() {
        let s = slice(&[(1, 101)]);
        assert!(s.contain(&slice(&[(10, 21)])));
        assert!(!s.contain(&slice(&[(50, 201)])));
        assert!(s.contain(&s));

        let multi = slice(&[(1, 5), (10, 20)]);
        assert!(multi.contain(&slice(&[(2, 4), (11, 12)])));
        assert!(!multi.contain(&slice(&[(4, 11)])));
        assert!(multi.contain(&IntervalSlice::new()));
    }

    #[test]
    fn test_minus() {
        let s = slice(&[(1, 10)]);
        assert_eq!(
            s.minus(&slice(&[(3, 5), (7, 8)])),
            slice(&[(1, 3), (5, 7), (8, 10)])
        );

        // split preserves both parts
        assert_eq!(s.minus(&slice(&[(4, 6)])), slice(&[(1, 4), (6, 10)]));

        // full cover empties the result
        assert!(s.minus(&slice(&[(0, 20)])).is_empty());

        // disjoint subtrahend leaves the minuend untouched
        assert_eq!(s.minus(&slice(&[(20, 30)])), s);

        // contain law: a \ b is always contained in a, disjoint from b
        let b = slice(&[(2, 4), (8, 12)]);
        let d = s.minus(&b);
        assert!(s.contain(&d));
        assert_eq!(d.minus(&b), d);
    }

    #[test]
    fn test_minus_multi_minuend() {
        let s = slice(&[(1, 5), (10, 20), (30, 40)]);
        assert_eq!(
            s.minus(&slice(&[(3, 12), (35, 50)])),
            slice(&[(1, 3), (12, 20), (30, 35)])
        );
    }
}
