//! Outlier rejection and noise smoothing for raw position fixes.
//!
//! The smoother is pure: it takes the last accepted logical position and a
//! raw fix, and decides whether the fix becomes the next logical position.
//! Accepted fixes are pulled toward the previous position, by a band weight
//! for short hops and by a share of their horizontal accuracy, then the gap
//! is filled with interpolated route points.
//!
//! ## Algorithm
//! 1. Measure the raw distance from the previous logical point
//! 2. Subtract `accuracy_influence * horizontal_accuracy` (capped at the raw distance)
//! 3. Drop the fix if it is too close or implies an impossible speed
//! 4. Blend it toward the previous point and interpolate the route

use chrono::{DateTime, Utc};

use crate::config::SmootherConfig;
use crate::geo_utils::{haversine_distance, interpolate, weighted_average};
use crate::{seconds_between, GeoPoint, RouteSegment};

/// Why a raw fix was not accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Logical distance below the drop threshold
    TooClose { distance: f64 },
    /// Implied speed above the threshold speed
    TooFast { speed: f64 },
    /// Timestamp not after the previous logical point
    NonIncreasingTime,
}

/// A fix accepted as the next logical position.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedStep {
    /// The smoothed logical position (last point of `segment`)
    pub point: GeoPoint,
    /// Interpolated route from the previous logical point to `point`
    pub segment: RouteSegment,
    /// Distance from the previous logical point after smoothing (meters)
    pub distance: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AcceptedStep {
    /// Elapsed seconds covered by this step.
    pub fn elapsed(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}

/// Result of feeding one raw fix to the smoother.
#[derive(Debug, Clone, PartialEq)]
pub enum SmoothingOutcome {
    /// No previous point existed, the fix is taken as is
    First(GeoPoint),
    Accepted(AcceptedStep),
    Rejected(RejectReason),
}

impl SmoothingOutcome {
    /// The new logical position, if any.
    pub fn logical_point(&self) -> Option<&GeoPoint> {
        match self {
            SmoothingOutcome::First(p) => Some(p),
            SmoothingOutcome::Accepted(step) => Some(&step.point),
            SmoothingOutcome::Rejected(_) => None,
        }
    }
}

/// Stateless smoother parameterized by a [`SmootherConfig`].
#[derive(Debug, Clone)]
pub struct TrackSmoother {
    config: SmootherConfig,
}

impl TrackSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Origin weight of the first band containing `distance` (0 if none).
    fn band_weight(&self, distance: f64) -> f64 {
        self.config
            .bands
            .iter()
            .find(|band| band.contains(distance))
            .map(|band| band.origin_weight)
            .unwrap_or(0.0)
    }

    /// Process `raw` against the previous logical position.
    pub fn process(&self, prev: Option<&GeoPoint>, raw: &GeoPoint) -> SmoothingOutcome {
        let prev = match prev {
            Some(p) => p,
            None => return SmoothingOutcome::First(*raw),
        };

        let elapsed = seconds_between(prev.timestamp, raw.timestamp);
        if elapsed <= 0.0 {
            return SmoothingOutcome::Rejected(RejectReason::NonIncreasingTime);
        }

        let raw_distance = haversine_distance(prev, raw);
        let accuracy_deduction =
            (raw.horizontal_accuracy * self.config.accuracy_influence).min(raw_distance);
        let logical_distance = raw_distance - accuracy_deduction;
        let speed = logical_distance / elapsed;

        if speed > self.config.threshold_speed {
            return SmoothingOutcome::Rejected(RejectReason::TooFast { speed });
        }
        if logical_distance < self.config.drop_threshold {
            return SmoothingOutcome::Rejected(RejectReason::TooClose {
                distance: logical_distance,
            });
        }

        // Correct the origin weight so the fix also moves closer by the deduction
        let deduction_share = if raw_distance > 0.0 {
            accuracy_deduction / raw_distance
        } else {
            0.0
        };
        let base_weight = self.band_weight(logical_distance);
        let origin_weight = 1.0 - (1.0 - base_weight) * (1.0 - deduction_share);

        let smoothed = weighted_average(prev, raw, origin_weight.clamp(0.0, 1.0), None);
        let route = interpolate(prev, &smoothed, self.config.route_time_accuracy);

        SmoothingOutcome::Accepted(AcceptedStep {
            point: smoothed,
            distance: haversine_distance(prev, &smoothed),
            start: prev.timestamp,
            end: smoothed.timestamp,
            segment: RouteSegment::new(route),
        })
    }
}

impl Default for TrackSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}
