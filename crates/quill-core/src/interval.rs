//! Half-open time ranges and normalised sets of them.
//!
//! An [`IntervalSet`] is always sorted by start with no empty, overlapping
//! or touching members. Every constructor and mutator re-establishes that
//! shape, so two sets covering the same instants compare equal.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{day_bounds, start_of_local_day, to_project_date};

/// `[start, end)` range of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateInterval {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Every representable instant.
    pub fn everything() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// One local calendar day.
    pub fn day(date: NaiveDate) -> Self {
        let (start, end) = day_bounds(date);
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// True iff `other` lies entirely inside `self`.
    pub fn engulfs(&self, other: &DateInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True iff the two share at least one instant.
    pub fn overlaps(&self, other: &DateInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True iff the two overlap or meet end to start.
    pub fn touches(&self, other: &DateInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersection(&self, other: &DateInterval) -> Option<DateInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }

    /// Widen to whole local days: from the midnight at or before `start`
    /// to the midnight at or after `end`.
    pub fn whole_days(&self) -> DateInterval {
        let start = start_of_local_day(to_project_date(self.start));
        let end_date = to_project_date(self.end);
        let end = if start_of_local_day(end_date) == self.end {
            self.end
        } else {
            day_bounds(end_date).1
        };
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Local calendar dates this interval touches, in order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let first = to_project_date(self.start);
        let end = self.end;
        let empty = self.is_empty();
        first
            .iter_days()
            .take_while(move |date| !empty && start_of_local_day(*date) < end)
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Normalised collection of [`DateInterval`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet {
    ranges: Vec<DateInterval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of an arbitrary collection of intervals.
    pub fn from_intervals<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = DateInterval>,
    {
        let mut ranges: Vec<DateInterval> = intervals
            .into_iter()
            .filter(|iv| !iv.is_empty())
            .collect();
        ranges.sort_by_key(|iv| (iv.start, iv.end));

        let mut merged: Vec<DateInterval> = Vec::with_capacity(ranges.len());
        for iv in ranges {
            match merged.last_mut() {
                Some(last) if last.touches(&iv) => {
                    last.end = last.end.max(iv.end);
                }
                _ => merged.push(iv),
            }
        }

        let set = Self { ranges: merged };
        debug_assert!(set.is_normalized());
        set
    }

    pub fn single(interval: DateInterval) -> Self {
        Self::from_intervals([interval])
    }

    pub fn iter(&self) -> impl Iterator<Item = &DateInterval> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[DateInterval] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Sorted, non-empty, and no two members overlap or touch.
    pub fn is_normalized(&self) -> bool {
        self.ranges.iter().all(|iv| !iv.is_empty())
            && self.ranges.windows(2).all(|pair| pair[0].end < pair[1].start)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.ranges.iter().any(|iv| iv.contains(instant))
    }

    /// True iff every instant of `interval` is in the set.
    pub fn covers(&self, interval: &DateInterval) -> bool {
        interval.is_empty() || self.ranges.iter().any(|iv| iv.engulfs(interval))
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        Self::from_intervals(self.ranges.iter().chain(other.ranges.iter()).copied())
    }

    /// Instants in `self` but not in `other`.
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        for iv in &self.ranges {
            let mut cursor = iv.start;
            for cut in other.ranges.iter().filter(|cut| cut.overlaps(iv)) {
                if cut.start > cursor {
                    out.push(DateInterval {
                        start: cursor,
                        end: cut.start,
                    });
                }
                cursor = cursor.max(cut.end);
            }
            if cursor < iv.end {
                out.push(DateInterval {
                    start: cursor,
                    end: iv.end,
                });
            }
        }
        Self::from_intervals(out)
    }

    pub fn intersection(&self, other: &IntervalSet) -> IntervalSet {
        let out = self.ranges.iter().flat_map(|a| {
            other
                .ranges
                .iter()
                .filter_map(move |b| a.intersection(b))
        });
        Self::from_intervals(out)
    }

    /// Instants covered by exactly one of the two sets.
    pub fn xor(&self, other: &IntervalSet) -> IntervalSet {
        self.difference(other).union(&other.difference(self))
    }

    pub fn insert(&mut self, interval: DateInterval) {
        *self = self.union(&Self::single(interval));
        debug_assert!(self.is_normalized());
    }

    pub fn remove(&mut self, interval: DateInterval) {
        *self = self.difference(&Self::single(interval));
        debug_assert!(self.is_normalized());
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

impl FromIterator<DateInterval> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = DateInterval>>(iter: T) -> Self {
        Self::from_intervals(iter)
    }
}
