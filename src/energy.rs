//! Energy expenditure per activity kind.
//!
//! The default model is MET based with a linear speed correction:
//! `(MET + 0.5 * (speed - reference_speed)) * mass * hours`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Kind of tracked activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Run,
    Walk,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Run => "Run",
            ActivityKind::Walk => "Walk",
        }
    }

    /// The other activity, for a run/walk toggle.
    pub fn next(&self) -> ActivityKind {
        match self {
            ActivityKind::Run => ActivityKind::Walk,
            ActivityKind::Walk => ActivityKind::Run,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Run" => Ok(ActivityKind::Run),
            "Walk" => Ok(ActivityKind::Walk),
            other => Err(TrackerError::UnknownActivityKind(other.to_string())),
        }
    }
}

/// Maps a movement to the energy it burned.
pub trait EnergyModel: Send + Sync {
    /// Energy in kcal for `distance` meters covered in `elapsed` seconds by
    /// someone of `mass_kg`.
    fn energy(&self, elapsed: f64, distance: f64, mass_kg: f64) -> f64;
}

/// MET model with a speed correction around a reference speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetEnergyModel {
    /// Metabolic equivalent of task
    pub met: f64,
    /// Speed at which `met` applies unchanged, in m/s
    pub reference_speed: f64,
}

impl MetEnergyModel {
    pub const RUN: MetEnergyModel = MetEnergyModel {
        met: 8.0,
        reference_speed: 100.0 / 36.0,
    };

    pub const WALK: MetEnergyModel = MetEnergyModel {
        met: 3.6,
        reference_speed: 55.0 / 36.0,
    };

    pub fn new(met: f64, reference_speed: f64) -> Self {
        Self {
            met,
            reference_speed,
        }
    }
}

impl EnergyModel for MetEnergyModel {
    fn energy(&self, elapsed: f64, distance: f64, mass_kg: f64) -> f64 {
        if elapsed <= 0.0 {
            return 0.0;
        }
        let speed = distance / elapsed;
        let factor = speed - self.reference_speed;
        ((self.met + factor * 0.5) * mass_kg * elapsed / 3600.0).max(0.0)
    }
}

/// Energy models keyed by activity kind.
#[derive(Clone)]
pub struct EnergyModelRegistry {
    models: HashMap<ActivityKind, Arc<dyn EnergyModel>>,
}

impl EnergyModelRegistry {
    /// A registry with no models.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Register (or replace) the model for `kind`.
    pub fn register(&mut self, kind: ActivityKind, model: Arc<dyn EnergyModel>) {
        self.models.insert(kind, model);
    }

    /// Model for `kind`. A missing entry is a configuration error.
    pub fn get(&self, kind: ActivityKind) -> Result<Arc<dyn EnergyModel>> {
        self.models
            .get(&kind)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownActivityKind(kind.to_string()))
    }
}

impl Default for EnergyModelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ActivityKind::Run, Arc::new(MetEnergyModel::RUN));
        registry.register(ActivityKind::Walk, Arc::new(MetEnergyModel::WALK));
        registry
    }
}

impl fmt::Debug for EnergyModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyModelRegistry")
            .field("kinds", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}
