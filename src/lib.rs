//! # Run Tracker
//!
//! Live GPS tracking for runs and walks.
//!
//! This library provides:
//! - Outlier rejection and noise smoothing of raw position fixes
//! - Distance and energy totals with a trailing-window live pace
//! - Compaction of per-step details into coarse samples for storage
//! - Pause/resume aware active duration
//! - A session state machine that hands the finished run to a persistence sink
//!
//! ## Features
//!
//! - **`persistence`** - Enable the SQLite persistence sink
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, TimeZone, Utc};
//! use run_tracker::{
//!     ActivityKind, EnergyModelRegistry, GeoPoint, MemorySink, RunSession, TrackingConfig,
//!     WritePermission,
//! };
//!
//! let start = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
//! let mut session = RunSession::new(
//!     TrackingConfig::default(),
//!     EnergyModelRegistry::default(),
//!     Arc::new(MemorySink::new()),
//!     Arc::new(WritePermission::Full),
//! );
//! session.start(ActivityKind::Run, 70.0, start).unwrap();
//!
//! let fixes: Vec<GeoPoint> = (0..5)
//!     .map(|i| GeoPoint::new(51.5074 + i as f64 * 0.0002, -0.1278, start + Duration::seconds(i * 10)))
//!     .collect();
//! session.ingest(&fixes);
//!
//! let report = session.finish(start + Duration::seconds(40)).unwrap().wait();
//! assert!(report.run.total_distance > 0.0);
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackerError};

// Geographic utilities (distance, spherical averaging, interpolation)
pub mod geo_utils;

// Algorithm toolbox - modular access to all algorithms
// Use run_tracker::algorithms::{...} for standalone algorithm access
pub mod algorithms;

// Tracking configuration (smoothing, compaction, pace window)
pub mod config;
pub use config::{SmootherConfig, SmoothingBand, TrackingConfig};

// Per-activity energy expenditure
pub mod energy;
pub use energy::{ActivityKind, EnergyModel, EnergyModelRegistry, MetEnergyModel};

// Outlier rejection and smoothing of raw fixes
pub mod smoothing;
pub use smoothing::{AcceptedStep, RejectReason, SmoothingOutcome, TrackSmoother};

// Detail records, compaction and live pace
pub mod details;
pub use details::{CompactedSample, DetailCompactor, DetailRecord, PaceWindow, QuantitySample, SampleKind};

// Pause/resume event log
pub mod duration;
pub use duration::{ActivityEvent, EventKind, SessionDurationTracker};

// Persistence hand-off (sink trait, background writer, sinks)
pub mod persistence;
pub use persistence::{
    FinishHandle, FinishReport, MemorySink, PermissionOracle, PersistenceSink, RouteWriter,
    SaveOutcome, WorkoutId, WorkoutRecord, WritePermission,
};
#[cfg(feature = "persistence")]
pub use persistence::SqliteSink;

// Stateful session orchestrator
pub mod session;
pub use session::{Lifecycle, RunSession};

// In-progress and completed run views
pub mod view;
pub use view::{format_duration, CompletedRun, RunSnapshot, RunView};

// User preferences
pub mod preferences;
pub use preferences::Preferences;

// ============================================================================
// Core Types
// ============================================================================

/// A timestamped position fix.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use run_tracker::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278, Utc::now()); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Horizontal accuracy radius in meters
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters
    pub vertical_accuracy: f64,
    /// Course in degrees from true north
    pub course: f64,
    /// Speed in m/s
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoPoint {
    /// Create a new point with zero altitude, accuracy and motion.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy: 0.0,
            vertical_accuracy: 0.0,
            course: 0.0,
            speed: 0.0,
            timestamp,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_accuracy(mut self, horizontal: f64, vertical: f64) -> Self {
        self.horizontal_accuracy = horizontal;
        self.vertical_accuracy = vertical;
        self
    }

    pub fn with_motion(mut self, course: f64, speed: f64) -> Self {
        self.course = course;
        self.speed = speed;
        self
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Polyline between two logical positions, endpoints included.
///
/// Produced once per accepted transition and never mutated afterwards.
/// A single-point segment marks a run with only one accepted position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    points: Vec<GeoPoint>,
}

impl RouteSegment {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }

    /// A one-point segment.
    pub fn dot(point: GeoPoint) -> Self {
        Self {
            points: vec![point],
        }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn first(&self) -> Option<&GeoPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&GeoPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Polyline length in meters.
    pub fn length(&self) -> f64 {
        geo_utils::polyline_length(&self.points)
    }
}

// ============================================================================
// Time helpers
// ============================================================================

/// Signed seconds from `from` to `to`, microsecond resolution.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// `t` shifted by a (possibly fractional) number of seconds.
pub(crate) fn offset_seconds(t: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    t + Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

// ============================================================================
// Tests
// ============================================================================
