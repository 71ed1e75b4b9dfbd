//! Tracking configuration.
//!
//! Defaults are the reference tuning for running and walking with a phone
//! GPS at roughly 1 Hz.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// A distance range in which a new fix is pulled toward the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingBand {
    /// Lower bound of the logical distance, inclusive (meters)
    pub min_distance: f64,
    /// Upper bound of the logical distance, inclusive (meters)
    pub max_distance: f64,
    /// Weight of the previous point in the average, in [0, 1]
    pub origin_weight: f64,
}

impl SmoothingBand {
    pub fn new(min_distance: f64, max_distance: f64, origin_weight: f64) -> Self {
        Self {
            min_distance,
            max_distance,
            origin_weight,
        }
    }

    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.min_distance && distance <= self.max_distance
    }
}

/// Configuration for outlier rejection and smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Logical distance under which a fix is dropped.
    /// Default: 6.0 meters
    pub drop_threshold: f64,

    /// Bands pulling fixes toward the previous point. The first band
    /// containing the logical distance wins.
    /// Default: [7.5, 15] → 0.875, [15, 30] → 0.7
    pub bands: Vec<SmoothingBand>,

    /// Maximum plausible speed between fixes.
    /// Default: 6.5 m/s
    pub threshold_speed: f64,

    /// Fraction of the horizontal accuracy subtracted from the raw distance.
    /// Default: 0.6
    pub accuracy_influence: f64,

    /// Maximum time between consecutive route positions.
    /// Default: 2.0 seconds
    pub route_time_accuracy: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            drop_threshold: 6.0,
            bands: vec![
                SmoothingBand::new(7.5, 15.0, 0.875),
                SmoothingBand::new(15.0, 30.0, 0.7),
            ],
            threshold_speed: 6.5,
            accuracy_influence: 0.6,
            route_time_accuracy: 2.0,
        }
    }
}

/// Full configuration of a tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub smoother: SmootherConfig,

    /// Time span covered by each compacted sample.
    /// Default: 15.0 seconds
    pub details_time_precision: f64,

    /// Trailing window for the live pace.
    /// Default: 45.0 seconds
    pub pace_window: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoother: SmootherConfig::default(),
            details_time_precision: 15.0,
            pace_window: 45.0,
        }
    }
}

impl TrackingConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every tunable is in range.
    pub fn validate(&self) -> Result<()> {
        let s = &self.smoother;
        if !(s.drop_threshold >= 0.0) {
            return Err(TrackerError::config("drop_threshold must be non-negative"));
        }
        if !(s.threshold_speed > 0.0) {
            return Err(TrackerError::config("threshold_speed must be positive"));
        }
        if !(0.0..=1.0).contains(&s.accuracy_influence) {
            return Err(TrackerError::config(format!(
                "accuracy_influence {} outside 0...1",
                s.accuracy_influence
            )));
        }
        if !(s.route_time_accuracy > 0.0) {
            return Err(TrackerError::config("route_time_accuracy must be positive"));
        }
        for band in &s.bands {
            if !(0.0..=1.0).contains(&band.origin_weight) {
                return Err(TrackerError::config(format!(
                    "band weight {} outside 0...1",
                    band.origin_weight
                )));
            }
            if band.min_distance > band.max_distance {
                return Err(TrackerError::config(format!(
                    "band range {}...{} is inverted",
                    band.min_distance, band.max_distance
                )));
            }
        }
        if !(self.details_time_precision > 0.0) {
            return Err(TrackerError::config(
                "details_time_precision must be positive",
            ));
        }
        if !(self.pace_window > 0.0) {
            return Err(TrackerError::config("pace_window must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = TrackingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smoother.bands.len(), 2);
        assert_eq!(config.pace_window, 45.0);
    }

    #[test]
    fn test_band_contains_is_inclusive() {
        let band = SmoothingBand::new(7.5, 15.0, 0.875);
        assert!(band.contains(7.5));
        assert!(band.contains(15.0));
        assert!(!band.contains(15.01));
    }

    #[test]
    fn test_rejects_bad_band_weight() {
        let mut config = TrackingConfig::default();
        config.smoother.bands.push(SmoothingBand::new(30.0, 40.0, 1.5));
        assert!(matches!(config.validate(), Err(TrackerError::Config { .. })));
    }

    #[test]
    fn test_rejects_inverted_band() {
        let mut config = TrackingConfig::default();
        config.smoother.bands = vec![SmoothingBand::new(20.0, 10.0, 0.5)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config = TrackingConfig::from_json(r#"{"pace_window": 60.0}"#).unwrap();
        assert_eq!(config.pace_window, 60.0);
        assert_eq!(config.details_time_precision, 15.0);
        assert_eq!(config.smoother, SmootherConfig::default());
    }

    #[test]
    fn test_from_json_validates() {
        let err = TrackingConfig::from_json(r#"{"smoother": {"accuracy_influence": 2.0}}"#);
        assert!(err.is_err());
    }
}
