//! Pause/resume event log and active duration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

/// Event log that starts with a pause and strictly alternates.
#[derive(Debug, Clone, Default)]
pub struct SessionDurationTracker {
    events: Vec<ActivityEvent>,
}

impl SessionDurationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// If the session is already paused.
    pub fn pause(&mut self, at: DateTime<Utc>) {
        assert!(!self.is_paused(), "session is already paused");
        self.events.push(ActivityEvent {
            kind: EventKind::Pause,
            at,
        });
    }

    /// # Panics
    /// If the session is not paused.
    pub fn resume(&mut self, at: DateTime<Utc>) {
        assert!(self.is_paused(), "session is not paused");
        self.events.push(ActivityEvent {
            kind: EventKind::Resume,
            at,
        });
    }

    /// Resume at `at` if the log ends on a pause, so a finished log is never
    /// mid-pause.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.is_paused() {
            self.resume(at);
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.events.last(), Some(e) if e.kind == EventKind::Pause)
    }

    pub fn events(&self) -> &[ActivityEvent] {
        &self.events
    }

    /// Wall time from `session_start` to `now` minus every paused span.
    /// A trailing open pause contributes nothing after it.
    pub fn active_duration(&self, now: DateTime<Utc>, session_start: DateTime<Utc>) -> Duration {
        let mut total = Duration::zero();
        let mut interval_start = session_start;

        let mut events = self.events.iter();
        while let Some(pause) = events.next() {
            total = total + (pause.at - interval_start);
            match events.next() {
                Some(resume) => interval_start = resume.at,
                None => return total,
            }
        }
        total + (now - interval_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_546_800 + secs, 0).unwrap()
    }

    #[test]
    fn test_no_events_is_wall_time() {
        let tracker = SessionDurationTracker::new();
        assert_eq!(tracker.active_duration(at(42), at(0)), Duration::seconds(42));
    }

    #[test]
    fn test_open_pause_excluded() {
        let mut tracker = SessionDurationTracker::new();
        tracker.pause(at(10));
        tracker.resume(at(15));
        tracker.pause(at(25));
        assert_eq!(tracker.active_duration(at(30), at(0)), Duration::seconds(20));
        assert!(tracker.is_paused());
    }

    #[test]
    fn test_resumed_span_counts_until_now() {
        let mut tracker = SessionDurationTracker::new();
        tracker.pause(at(10));
        tracker.resume(at(15));
        assert_eq!(tracker.active_duration(at(30), at(0)), Duration::seconds(25));
    }

    #[test]
    fn test_close_resumes_open_pause() {
        let mut tracker = SessionDurationTracker::new();
        tracker.pause(at(10));
        tracker.close(at(30));
        assert_eq!(tracker.events().len(), 2);
        assert_eq!(tracker.events()[1].kind, EventKind::Resume);
        assert_eq!(tracker.active_duration(at(30), at(0)), Duration::seconds(10));

        // Already resumed: no-op
        tracker.close(at(40));
        assert_eq!(tracker.events().len(), 2);
    }

    #[test]
    #[should_panic(expected = "already paused")]
    fn test_double_pause_panics() {
        let mut tracker = SessionDurationTracker::new();
        tracker.pause(at(1));
        tracker.pause(at(2));
    }

    #[test]
    #[should_panic(expected = "not paused")]
    fn test_resume_without_pause_panics() {
        let mut tracker = SessionDurationTracker::new();
        tracker.resume(at(1));
    }
}
