//! trailing time window of raw readings.
//!
//! pruning happens on insert, relative to the inserted reading's timestamp,
//! so repeated snapshots between inserts see the same contents.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;

use crate::domain::Reading;

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    horizon: TimeDelta,
    max_entries: usize,
    entries: VecDeque<Reading>,
}

impl SlidingWindow {
    pub fn new(horizon: TimeDelta, max_entries: usize) -> Self {
        Self {
            horizon,
            max_entries: max_entries.max(1),
            entries: VecDeque::new(),
        }
    }

    /// append a reading, then drop everything older than the horizon
    pub fn insert(&mut self, reading: Reading) {
        let cutoff = reading.timestamp - self.horizon;
        self.entries.push_back(reading);
        // arrival order is near time order, but a stepped wall clock can
        // break that; scan the whole deque
        self.entries.retain(|r| r.timestamp >= cutoff);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// entries within the horizon of `now`, oldest first
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<Reading> {
        self.entries
            .iter()
            .filter(|r| now - r.timestamp <= self.horizon)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, value: u16) -> Reading {
        Reading {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            node_id: "A".into(),
            value,
        }
    }

    fn window() -> SlidingWindow {
        SlidingWindow::new(TimeDelta::seconds(30), 1024)
    }

    #[test]
    fn test_insert_prunes_expired() {
        let mut w = window();
        w.insert(at(0, 1));
        w.insert(at(10, 2));
        w.insert(at(30, 3));
        assert_eq!(w.len(), 3, "exactly 30s old is still inside");

        w.insert(at(35, 4));
        let values: Vec<u16> = w.snapshot(at(35, 0).timestamp).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn test_snapshot_never_exceeds_horizon() {
        let mut w = window();
        for s in 0..20 {
            w.insert(at(s * 3, s as u16));
        }
        let now = at(70, 0).timestamp;
        let snap = w.snapshot(now);
        assert!(!snap.is_empty());
        assert!(snap.iter().all(|r| now - r.timestamp <= TimeDelta::seconds(30)));
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut w = window();
        w.insert(at(0, 1));
        w.insert(at(5, 2));
        assert!(w.snapshot(at(100, 0).timestamp).is_empty());
        assert_eq!(w.len(), 2);
        assert_eq!(w.snapshot(at(6, 0).timestamp).len(), 2);
    }

    #[test]
    fn test_clock_step_backwards_still_prunes() {
        let mut w = window();
        w.insert(at(100, 1));
        w.insert(at(0, 2));
        w.insert(at(140, 3));
        let values: Vec<u16> = w.snapshot(at(140, 0).timestamp).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3]);
    }

    #[test]
    fn test_entry_cap_evicts_oldest() {
        let mut w = SlidingWindow::new(TimeDelta::seconds(30), 3);
        for v in 0..5 {
            w.insert(at(1, v));
        }
        let values: Vec<u16> = w.snapshot(at(1, 0).timestamp).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2, 3, 4]);
    }
}
