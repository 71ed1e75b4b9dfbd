//! User preferences stored as a JSON file.
//!
//! A session reads the activity kind and body mass through
//! [`RunSession::start_with_preferences`]. Saved workouts are counted with
//! [`Preferences::record_outcome`] once the finish handle resolves.
//!
//! [`RunSession::start_with_preferences`]: crate::RunSession::start_with_preferences

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::energy::ActivityKind;
use crate::error::{OptionExt, Result};
use crate::persistence::SaveOutcome;

/// Body mass used for energy when the user never set one.
pub const DEFAULT_MASS_KG: f64 = 62.0;

/// Saved workouts before the app may ask for a review.
pub const REVIEW_REQUEST_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Kind preselected for the next session
    pub activity_kind: ActivityKind,
    /// Body mass in kilograms, if known
    pub mass_kg: Option<f64>,
    pub review_request_counter: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            activity_kind: ActivityKind::Run,
            mass_kg: None,
            review_request_counter: 0,
        }
    }
}

impl Preferences {
    /// Load preferences from `path`, or defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "[Preferences] No preferences at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write preferences to `path` as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Switch to the other activity kind and return it.
    pub fn toggle_activity(&mut self) -> ActivityKind {
        self.activity_kind = self.activity_kind.next();
        self.activity_kind
    }

    pub fn set_mass_kg(&mut self, mass_kg: f64) -> Result<()> {
        let mass = Some(mass_kg)
            .filter(|m| m.is_finite() && *m > 0.0)
            .ok_or_config("body mass must be a positive number of kilograms")?;
        self.mass_kg = Some(mass);
        Ok(())
    }

    /// Mass to feed the energy model.
    pub fn effective_mass(&self) -> f64 {
        self.mass_kg.unwrap_or(DEFAULT_MASS_KG)
    }

    /// Count a workout that reached storage.
    pub fn record_saved_workout(&mut self) {
        self.review_request_counter = self.review_request_counter.saturating_add(1);
    }

    /// Count the workout if `outcome` says it reached storage. Returns
    /// whether it was counted.
    pub fn record_outcome(&mut self, outcome: &SaveOutcome) -> bool {
        if outcome.workout_saved() {
            self.record_saved_workout();
        }
        outcome.workout_saved()
    }

    pub fn should_request_review(&self) -> bool {
        self.review_request_counter >= REVIEW_REQUEST_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let prefs = Preferences::default();
        assert_eq!(prefs.activity_kind, ActivityKind::Run);
        assert_eq!(prefs.effective_mass(), DEFAULT_MASS_KG);
        assert!(!prefs.should_request_review());
    }

    #[test]
    fn test_toggle_activity() {
        let mut prefs = Preferences::default();
        assert_eq!(prefs.toggle_activity(), ActivityKind::Walk);
        assert_eq!(prefs.toggle_activity(), ActivityKind::Run);
    }

    #[test]
    fn test_mass_must_be_positive() {
        let mut prefs = Preferences::default();
        assert!(prefs.set_mass_kg(0.0).is_err());
        assert!(prefs.set_mass_kg(f64::NAN).is_err());
        prefs.set_mass_kg(71.5).unwrap();
        assert_eq!(prefs.effective_mass(), 71.5);
    }

    #[test]
    fn test_review_threshold() {
        let mut prefs = Preferences::default();
        for _ in 0..REVIEW_REQUEST_THRESHOLD {
            prefs.record_saved_workout();
        }
        assert!(prefs.should_request_review());
    }

    #[test]
    fn test_only_saved_outcomes_count() {
        let mut prefs = Preferences::default();
        assert!(prefs.record_outcome(&SaveOutcome::Saved { samples: 4 }));
        assert!(!prefs.record_outcome(&SaveOutcome::Skipped));
        assert!(!prefs.record_outcome(&SaveOutcome::Failed {
            error: crate::TrackerError::persistence("disk full"),
        }));
        assert_eq!(prefs.review_request_counter, 1);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let prefs = Preferences::load(dir.path().join("prefs.json")).unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut prefs = Preferences::default();
        prefs.toggle_activity();
        prefs.set_mass_kg(80.0).unwrap();
        prefs.record_saved_workout();
        prefs.save(&path).unwrap();

        assert_eq!(Preferences::load(&path).unwrap(), prefs);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, r#"{"activity_kind": "Walk"}"#).unwrap();

        let prefs = Preferences::load(&path).unwrap();
        assert_eq!(prefs.activity_kind, ActivityKind::Walk);
        assert_eq!(prefs.mass_kg, None);
    }
}
