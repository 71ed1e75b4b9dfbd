//! Per-step detail records, live pace and compaction into coarse samples.
//!
//! Every accepted step produces one [`DetailRecord`]. The compactor keeps
//! only the records still needed: those inside the pace window and those
//! not yet folded into a [`CompactedSample`]. Memory stays bounded by the
//! window size no matter how long the session runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::seconds_between;

/// Distance and energy covered over one accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    /// Meters, >= 0
    pub distance: f64,
    /// Kilocalories, >= 0
    pub energy: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DetailRecord {
    /// # Panics
    /// If `end` precedes `start` or a quantity is negative.
    pub fn new(distance: f64, energy: f64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "detail record ends before it starts");
        assert!(
            distance >= 0.0 && energy >= 0.0,
            "detail record quantities must be non-negative"
        );
        Self {
            distance,
            energy,
            start,
            end,
        }
    }
}

/// Totals over a run of detail records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactedSample {
    pub total_distance: f64,
    pub total_energy: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Quantity carried by a [`QuantitySample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    /// Meters
    Distance,
    /// Kilocalories
    Energy,
}

/// A single persisted quantity over a time range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantitySample {
    pub kind: SampleKind,
    pub value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CompactedSample {
    /// The distance and energy siblings, sharing start and end.
    pub fn quantity_samples(&self) -> [QuantitySample; 2] {
        [
            QuantitySample {
                kind: SampleKind::Distance,
                value: self.total_distance,
                start: self.start,
                end: self.end,
            },
            QuantitySample {
                kind: SampleKind::Energy,
                value: self.total_energy,
                start: self.start,
                end: self.end,
            },
        ]
    }
}

/// Pace over the trailing window and how many records it covered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceWindow {
    /// Seconds per kilometer, `None` when no distance was covered
    pub pace: Option<f64>,
    pub record_count: usize,
}

/// Buffer of detail records with periodic compaction.
#[derive(Debug, Clone)]
pub struct DetailCompactor {
    /// Seconds a compacted sample must span before it is emitted
    details_time_precision: f64,
    records: VecDeque<DetailRecord>,
    /// Records appended since the last compaction, at the tail of `records`
    uncompacted: usize,
    samples: Vec<CompactedSample>,
}

impl DetailCompactor {
    pub fn new(details_time_precision: f64) -> Self {
        Self {
            details_time_precision,
            records: VecDeque::new(),
            uncompacted: 0,
            samples: Vec::new(),
        }
    }

    /// Push a record. Records must arrive in time order.
    pub fn append(&mut self, record: DetailRecord) {
        debug_assert!(
            self.records.back().map_or(true, |last| last.end <= record.start),
            "detail records out of order"
        );
        self.records.push_back(record);
        self.uncompacted += 1;
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn uncompacted_count(&self) -> usize {
        self.uncompacted
    }

    /// End of the most recent sample, or the start of the oldest record.
    fn last_compaction_end(&self) -> Option<DateTime<Utc>> {
        self.samples
            .last()
            .map(|s| s.end)
            .or_else(|| self.records.front().map(|r| r.start))
    }

    /// Pace over records ending within `window` seconds of the newest end.
    ///
    /// Scans backward from the newest record, so the cost is proportional to
    /// the records inside the window.
    pub fn pace_window(&self, window: f64) -> PaceWindow {
        let newest_end = match self.records.back() {
            Some(r) => r.end,
            None => {
                return PaceWindow {
                    pace: None,
                    record_count: 0,
                }
            }
        };

        let mut distance = 0.0;
        let mut slice_start = newest_end;
        let mut record_count = 0;
        for record in self.records.iter().rev() {
            if seconds_between(record.end, newest_end) >= window {
                break;
            }
            distance += record.distance;
            slice_start = record.start;
            record_count += 1;
        }

        let pace = if distance > 0.0 {
            Some(seconds_between(slice_start, newest_end) * 1000.0 / distance)
        } else {
            None
        };
        PaceWindow { pace, record_count }
    }

    /// Live pace in seconds per kilometer.
    pub fn current_pace(&self, window: f64) -> Option<f64> {
        self.pace_window(window).pace
    }

    /// Fold the records since the last compaction into a sample.
    ///
    /// Without `flush`, only proceeds once they span at least the details
    /// time precision. Returns the emitted sample.
    pub fn compact(&mut self, flush: bool) -> Option<CompactedSample> {
        let end = self.records.back()?.end;
        let last_end = self.last_compaction_end()?;

        if !flush && seconds_between(last_end, end) < self.details_time_precision {
            return None;
        }

        let index = self.records.iter().position(|r| r.start >= last_end)?;
        self.uncompacted = 0;

        let range = self.records.range(index..);
        let start = self.records[index].start;
        let (total_distance, total_energy) = range
            .fold((0.0, 0.0), |(d, e), r| (d + r.distance, e + r.energy));

        let sample = CompactedSample {
            total_distance,
            total_energy,
            start,
            end,
        };
        self.samples.push(sample);
        Some(sample)
    }

    /// Drop records needed neither by the pace window nor a future compaction.
    pub fn trim_history(&mut self, pace_record_count: usize) {
        let keep = pace_record_count.max(self.uncompacted);
        if self.records.len() > keep {
            let excess = self.records.len() - keep;
            self.records.drain(..excess);
        }
    }

    /// Drop every buffered record; samples are kept.
    pub fn clear_records(&mut self) {
        self.records.clear();
        self.uncompacted = 0;
    }

    pub fn samples(&self) -> &[CompactedSample] {
        &self.samples
    }

    pub fn take_samples(&mut self) -> Vec<CompactedSample> {
        std::mem::take(&mut self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_546_800 + secs, 0).unwrap()
    }

    fn record(start: i64, end: i64, distance: f64) -> DetailRecord {
        DetailRecord::new(distance, distance / 10.0, at(start), at(end))
    }

    #[test]
    fn test_compacts_once_precision_reached() {
        let mut compactor = DetailCompactor::new(15.0);
        let mut emitted = Vec::new();
        for i in 0..4 {
            compactor.append(record(i * 5, i * 5 + 5, 10.0));
            if let Some(sample) = compactor.compact(false) {
                emitted.push(sample);
            }
        }

        assert_eq!(emitted.len(), 1);
        let sample = emitted[0];
        assert_eq!(sample.start, at(0));
        assert_eq!(sample.end, at(15));
        assert!((sample.total_distance - 30.0).abs() < 1e-9);
        assert!((sample.total_energy - 3.0).abs() < 1e-9);
        assert_eq!(compactor.uncompacted_count(), 1);
    }

    #[test]
    fn test_flush_emits_short_tail() {
        let mut compactor = DetailCompactor::new(15.0);
        for i in 0..4 {
            compactor.append(record(i * 5, i * 5 + 5, 10.0));
            compactor.compact(false);
        }

        let tail = compactor.compact(true).unwrap();
        assert_eq!(tail.start, at(15));
        assert_eq!(tail.end, at(20));
        assert!((tail.total_distance - 10.0).abs() < 1e-9);

        // Nothing left to fold
        assert!(compactor.compact(true).is_none());
        assert_eq!(compactor.samples().len(), 2);
    }

    #[test]
    fn test_no_double_counting_after_trim() {
        let mut compactor = DetailCompactor::new(15.0);
        let mut total = 0.0;
        for i in 0..40 {
            compactor.append(record(i * 3, i * 3 + 3, 7.0));
            total += 7.0;
            let window = compactor.pace_window(45.0);
            compactor.compact(false);
            compactor.trim_history(window.record_count);
        }
        compactor.compact(true);

        let compacted: f64 = compactor.samples().iter().map(|s| s.total_distance).sum();
        assert!((compacted - total).abs() < 1e-9);
        for w in compactor.samples().windows(2) {
            assert!(w[0].end <= w[1].start);
        }
        // 45s window at 3s records
        assert!(compactor.len() <= 15);
    }

    #[test]
    fn test_pace_window() {
        let mut compactor = DetailCompactor::new(15.0);
        assert_eq!(compactor.current_pace(45.0), None);

        // 100m every 30s: 300 s/km
        for i in 0..4 {
            compactor.append(record(i * 30, i * 30 + 30, 100.0));
        }
        let window = compactor.pace_window(45.0);
        // Records ending at 120 and 90 are within 45s of the newest end
        assert_eq!(window.record_count, 2);
        assert!((window.pace.unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_pace_none_without_distance() {
        let mut compactor = DetailCompactor::new(15.0);
        compactor.append(record(0, 5, 0.0));
        assert_eq!(compactor.current_pace(45.0), None);
    }

    #[test]
    fn test_quantity_samples_share_bounds() {
        let sample = CompactedSample {
            total_distance: 42.0,
            total_energy: 3.5,
            start: at(0),
            end: at(15),
        };
        let [distance, energy] = sample.quantity_samples();
        assert_eq!(distance.kind, SampleKind::Distance);
        assert_eq!(energy.kind, SampleKind::Energy);
        assert_eq!(distance.start, energy.start);
        assert_eq!(distance.end, energy.end);
        assert_eq!(energy.value, 3.5);
    }

    #[test]
    #[should_panic(expected = "ends before")]
    fn test_record_rejects_inverted_range() {
        DetailRecord::new(1.0, 0.0, at(10), at(5));
    }
}
