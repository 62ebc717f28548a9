//! Media timeline values and buffered range bookkeeping.

use std::fmt;
use std::ops::{Add, Range, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A point on the media timeline with nanosecond precision.
///
/// Container timestamps can legitimately be negative (edit lists, decode
/// times ahead of the first presentation time), so the value is signed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    /// Creates a time from a raw nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds, saturating at the `i64` bounds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a time from fractional seconds, rounding to the nearest nanosecond.
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * 1_000_000_000.0).round() as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Absolute distance between two points on the timeline.
    pub fn distance(self, other: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(other.0).saturating_abs())
    }
}

impl From<Duration> for MediaTime {
    fn from(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Sorted, non-overlapping set of buffered time ranges.
///
/// Ranges are half-open (`start..end`). Inserting an overlapping or adjacent
/// range merges it with its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedRanges {
    ranges: Vec<Range<MediaTime>>,
}

impl BufferedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a range, merging it with any range it touches.
    pub fn insert(&mut self, range: Range<MediaTime>) {
        if range.start >= range.end {
            return;
        }

        let mut merged = range;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for existing in self.ranges.drain(..) {
            if existing.end < merged.start || existing.start > merged.end {
                kept.push(existing);
            } else {
                merged.start = merged.start.min(existing.start);
                merged.end = merged.end.max(existing.end);
            }
        }
        kept.push(merged);
        kept.sort_by_key(|r| r.start);
        self.ranges = kept;
    }

    /// Returns true when `time` falls inside one of the ranges.
    pub fn contains(&self, time: MediaTime) -> bool {
        self.ranges.iter().any(|r| r.start <= time && time < r.end)
    }

    /// Finds the start of a buffered range lying just after `time`.
    ///
    /// Only ranges starting in `(time, time + epsilon]` qualify; the earliest
    /// such start is returned.
    pub fn start_within(&self, time: MediaTime, epsilon: MediaTime) -> Option<MediaTime> {
        self.ranges
            .iter()
            .map(|r| r.start)
            .find(|start| *start > time && *start - time <= epsilon)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<MediaTime>> {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_time_conversions() {
        assert_eq!(MediaTime::from_millis(1500).as_nanos(), 1_500_000_000);
        assert_eq!(MediaTime::from_secs_f64(0.25), MediaTime::from_millis(250));
        assert_eq!(
            MediaTime::from(Duration::from_millis(40)),
            MediaTime::from_millis(40)
        );
        assert_eq!(MediaTime::from_millis(1234).to_string(), "1.234s");
    }

    #[test]
    fn test_media_time_arithmetic_saturates() {
        let max = MediaTime::from_nanos(i64::MAX);
        assert_eq!(max + MediaTime::from_millis(1), max);
        assert_eq!(
            MediaTime::from_millis(10).distance(MediaTime::from_millis(30)),
            MediaTime::from_millis(20)
        );
    }

    #[test]
    fn test_extreme_millis_saturate() {
        assert_eq!(MediaTime::from_millis(i64::MAX), MediaTime::from_nanos(i64::MAX));
        assert_eq!(MediaTime::from_millis(i64::MIN), MediaTime::from_nanos(i64::MIN));
        assert_eq!(
            MediaTime::from_nanos(i64::MIN).distance(MediaTime::from_nanos(i64::MAX)),
            MediaTime::from_nanos(i64::MAX)
        );
    }

    #[test]
    fn test_buffered_ranges_merge_overlapping() {
        let mut ranges = BufferedRanges::new();
        ranges.insert(MediaTime::from_millis(0)..MediaTime::from_millis(1000));
        ranges.insert(MediaTime::from_millis(3000)..MediaTime::from_millis(4000));
        ranges.insert(MediaTime::from_millis(900)..MediaTime::from_millis(2000));

        let collected: Vec<_> = ranges.iter().cloned().collect();
        assert_eq!(
            collected,
            vec![
                MediaTime::from_millis(0)..MediaTime::from_millis(2000),
                MediaTime::from_millis(3000)..MediaTime::from_millis(4000),
            ]
        );
        assert!(ranges.contains(MediaTime::from_millis(1500)));
        assert!(!ranges.contains(MediaTime::from_millis(2500)));
        assert!(!ranges.contains(MediaTime::from_millis(4000)));
    }

    #[test]
    fn test_buffered_ranges_ignore_empty_range() {
        let mut ranges = BufferedRanges::new();
        ranges.insert(MediaTime::from_millis(5)..MediaTime::from_millis(5));
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_start_within_epsilon() {
        let mut ranges = BufferedRanges::new();
        ranges.insert(MediaTime::from_millis(2050)..MediaTime::from_millis(3000));

        let epsilon = MediaTime::from_millis(100);
        assert_eq!(
            ranges.start_within(MediaTime::from_millis(2000), epsilon),
            Some(MediaTime::from_millis(2050))
        );
        assert_eq!(
            ranges.start_within(MediaTime::from_millis(1900), epsilon),
            None
        );
    }
}
