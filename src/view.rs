//! Read-only views of a run, in progress or completed.
//!
//! Presentation code matches on [`RunView`] instead of probing optional
//! fields: only an in-progress run has a live pace, only a completed run
//! has a fixed end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::ActivityEvent;
use crate::energy::ActivityKind;
use crate::{GeoPoint, RouteSegment};

/// Snapshot of a session that is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub kind: ActivityKind,
    pub start: DateTime<Utc>,
    /// Instant the snapshot was taken
    pub now: DateTime<Utc>,
    /// Active seconds, pauses excluded
    pub duration_secs: f64,
    /// Meters
    pub total_distance: f64,
    /// Kilocalories
    pub total_energy: f64,
    /// Seconds per kilometer over the trailing window
    pub current_pace: Option<f64>,
    pub paused: bool,
    pub route: Vec<RouteSegment>,
    pub events: Vec<ActivityEvent>,
    pub start_position: Option<GeoPoint>,
}

/// A finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub kind: ActivityKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Active seconds, pauses excluded
    pub duration_secs: f64,
    /// Meters
    pub total_distance: f64,
    /// Kilocalories
    pub total_energy: f64,
    pub route: Vec<RouteSegment>,
    /// Pause/resume log, never ending on a pause
    pub events: Vec<ActivityEvent>,
    pub start_position: Option<GeoPoint>,
    pub end_position: Option<GeoPoint>,
}

impl CompletedRun {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunView {
    InProgress(RunSnapshot),
    Completed(CompletedRun),
}

impl RunView {
    pub fn kind(&self) -> ActivityKind {
        match self {
            RunView::InProgress(s) => s.kind,
            RunView::Completed(r) => r.kind,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        match self {
            RunView::InProgress(s) => s.start,
            RunView::Completed(r) => r.start,
        }
    }

    pub fn total_distance(&self) -> f64 {
        match self {
            RunView::InProgress(s) => s.total_distance,
            RunView::Completed(r) => r.total_distance,
        }
    }

    pub fn total_energy(&self) -> f64 {
        match self {
            RunView::InProgress(s) => s.total_energy,
            RunView::Completed(r) => r.total_energy,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        match self {
            RunView::InProgress(s) => s.duration_secs,
            RunView::Completed(r) => r.duration_secs,
        }
    }

    pub fn route(&self) -> &[RouteSegment] {
        match self {
            RunView::InProgress(s) => &s.route,
            RunView::Completed(r) => &r.route,
        }
    }

    pub fn start_position(&self) -> Option<&GeoPoint> {
        match self {
            RunView::InProgress(s) => s.start_position.as_ref(),
            RunView::Completed(r) => r.start_position.as_ref(),
        }
    }

    /// Average pace in seconds per kilometer.
    pub fn average_pace(&self) -> Option<f64> {
        let distance = self.total_distance();
        if distance > 0.0 {
            Some(self.duration_secs() / distance * 1000.0)
        } else {
            None
        }
    }

    /// Display name derived from the start time.
    pub fn name(&self) -> String {
        self.start().format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Format seconds as `HH:MM:SS`, or `MM:SS` when `hide_hours` is set and
/// the value is under an hour. Negative values get a leading `-`.
pub fn format_duration(seconds: f64, hide_hours: bool) -> String {
    let negative = seconds < 0.0;
    let total = seconds.abs().floor() as u64;

    let secs = total % 60;
    let mins = (total / 60) % 60;
    let hours = total / 3600;

    let body = if hide_hours && hours == 0 {
        format!("{}:{:02}", mins, secs)
    } else {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    };
    if negative {
        format!("-{}", body)
    } else {
        body
    }
}
