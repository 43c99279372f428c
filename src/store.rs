//! Time-ordered record stores with binary-search lookups.
//!
//! Records are collected unsorted while files are parsed and handed to a
//! [`ChronoStore`] exactly once, which sorts them (stably) and freezes them.
//! All queries are read-only.

use chrono::{NaiveDateTime, TimeDelta};

use crate::record::{AntennaCounterSnapshot, BtmAlarmEvent, TelemetryMessage};

/// A record that carries its own timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> NaiveDateTime;
}

impl Timestamped for TelemetryMessage {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Timestamped for BtmAlarmEvent {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Timestamped for AntennaCounterSnapshot {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Records sorted ascending by timestamp.
#[derive(Debug, Clone)]
pub struct ChronoStore<T> {
    records: Vec<T>,
}

impl<T> Default for ChronoStore<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Timestamped> ChronoStore<T> {
    /// Sort the records once. Records with equal timestamps keep their
    /// original relative order.
    pub fn from_unsorted(mut records: Vec<T>) -> Self {
        records.sort_by_key(|r| r.timestamp());
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.records.get(index)
    }

    /// Index of the first record with timestamp >= `ts`.
    fn lower_bound(&self, ts: NaiveDateTime) -> usize {
        self.records.partition_point(|r| r.timestamp() < ts)
    }

    /// Index of the first record with timestamp > `ts`.
    fn upper_bound(&self, ts: NaiveDateTime) -> usize {
        self.records.partition_point(|r| r.timestamp() <= ts)
    }

    /// Index of the last record with timestamp <= `ts`.
    pub fn at_or_before_index(&self, ts: NaiveDateTime) -> Option<usize> {
        self.upper_bound(ts).checked_sub(1)
    }

    /// The last record with timestamp <= `ts`.
    pub fn at_or_before(&self, ts: NaiveDateTime) -> Option<&T> {
        self.at_or_before_index(ts).map(|i| &self.records[i])
    }

    /// Index of the first record with timestamp >= `ts`.
    pub fn at_or_after_index(&self, ts: NaiveDateTime) -> Option<usize> {
        let idx = self.lower_bound(ts);
        (idx < self.records.len()).then_some(idx)
    }

    /// The first record with timestamp >= `ts`.
    pub fn at_or_after(&self, ts: NaiveDateTime) -> Option<&T> {
        self.at_or_after_index(ts).map(|i| &self.records[i])
    }

    /// Index of the record closest in time to `ts`; ties go to the earlier record.
    pub fn nearest_index(&self, ts: NaiveDateTime) -> Option<usize> {
        let idx = self.lower_bound(ts);
        let after = (idx < self.records.len()).then_some(idx);
        let before = idx.checked_sub(1);

        match (before, after) {
            (None, None) => None,
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (Some(b), Some(a)) => {
                let gap_before: TimeDelta = ts - self.records[b].timestamp();
                let gap_after: TimeDelta = self.records[a].timestamp() - ts;
                if gap_after < gap_before {
                    Some(a)
                } else {
                    Some(b)
                }
            }
        }
    }

    /// The record closest in time to `ts`; ties go to the earlier record.
    pub fn nearest(&self, ts: NaiveDateTime) -> Option<&T> {
        self.nearest_index(ts).map(|i| &self.records[i])
    }

    /// Records with `start <= timestamp <= end`.
    pub fn range(&self, start: NaiveDateTime, end: NaiveDateTime) -> &[T] {
        if end < start {
            return &[];
        }
        let lo = self.lower_bound(start);
        let hi = self.upper_bound(end);
        &self.records[lo..hi]
    }
}

impl<'a, T> IntoIterator for &'a ChronoStore<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn alarm(secs: i64, value: u32) -> BtmAlarmEvent {
        BtmAlarmEvent {
            timestamp: at(secs),
            value,
        }
    }

    fn store(times: &[i64]) -> ChronoStore<BtmAlarmEvent> {
        ChronoStore::from_unsorted(
            times
                .iter()
                .enumerate()
                .map(|(i, t)| alarm(*t, i as u32))
                .collect(),
        )
    }

    #[test]
    fn test_sort_is_stable() {
        let s = store(&[30, 10, 20, 10]);
        let values: Vec<u32> = s.iter().map(|a| a.value).collect();
        assert_eq!(values, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_at_or_before() {
        let s = store(&[10, 20, 30]);
        assert!(s.at_or_before(at(9)).is_none());
        assert_eq!(s.at_or_before(at(10)).unwrap().timestamp, at(10));
        assert_eq!(s.at_or_before(at(25)).unwrap().timestamp, at(20));
        assert_eq!(s.at_or_before(at(99)).unwrap().timestamp, at(30));
    }

    #[test]
    fn test_at_or_before_duplicates_returns_last() {
        let s = store(&[10, 10, 10]);
        assert_eq!(s.at_or_before(at(10)).unwrap().value, 2);
    }

    #[test]
    fn test_at_or_after() {
        let s = store(&[10, 20, 30]);
        assert_eq!(s.at_or_after(at(11)).unwrap().timestamp, at(20));
        assert_eq!(s.at_or_after(at(20)).unwrap().timestamp, at(20));
        assert!(s.at_or_after(at(31)).is_none());
    }

    #[test]
    fn test_nearest_tie_prefers_earlier() {
        let s = store(&[10, 20]);
        assert_eq!(s.nearest(at(15)).unwrap().timestamp, at(10));
        assert_eq!(s.nearest(at(16)).unwrap().timestamp, at(20));
        assert_eq!(s.nearest(at(0)).unwrap().timestamp, at(10));
        assert_eq!(s.nearest(at(100)).unwrap().timestamp, at(20));
    }

    #[test]
    fn test_empty_store() {
        let s: ChronoStore<BtmAlarmEvent> = ChronoStore::default();
        assert!(s.is_empty());
        assert!(s.nearest(at(0)).is_none());
        assert!(s.at_or_before(at(0)).is_none());
        assert!(s.at_or_after(at(0)).is_none());
        assert!(s.range(at(0), at(10)).is_empty());
    }

    #[test]
    fn test_range_inclusive() {
        let s = store(&[10, 20, 30, 40]);
        let r = s.range(at(20), at(30));
        assert_eq!(r.len(), 2);
        assert!(s.range(at(30), at(20)).is_empty());
        assert_eq!(s.range(at(0), at(100)).len(), 4);
    }

    proptest! {
        #[test]
        fn prop_sorted_after_construction(times in prop::collection::vec(0i64..10_000, 0..50)) {
            let s = store(&times);
            for pair in s.as_slice().windows(2) {
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }

        #[test]
        fn prop_queries_match_brute_force(
            times in prop::collection::vec(0i64..1_000, 1..40),
            query in -10i64..1_010,
        ) {
            let s = store(&times);
            let q = at(query);

            let expected_before = s.iter().filter(|a| a.timestamp <= q).last().map(|a| a.timestamp);
            prop_assert_eq!(s.at_or_before(q).map(|a| a.timestamp), expected_before);

            let best = s
                .iter()
                .map(|a| ((a.timestamp - q).num_seconds().abs(), a.timestamp))
                .min()
                .map(|(_, ts)| ts);
            prop_assert_eq!(s.nearest(q).map(|a| a.timestamp), best);
        }
    }
}
