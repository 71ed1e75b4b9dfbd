//! # Algorithm Toolbox
//!
//! Direct access to the tracking building blocks, for callers that want to
//! smooth, account or time a track without running a full [`RunSession`].
//!
//! ## Core Algorithms
//!
//! - **Track Smoothing**: outlier rejection and band-weighted noise smoothing
//! - **Detail Compaction**: per-step records folded into coarse samples
//! - **Live Pace**: pace over a trailing time window
//! - **Active Duration**: wall time minus paused spans
//! - **Energy**: MET-based energy with a speed correction
//!
//! ## Geographic Utilities
//!
//! - **Haversine Distance**: Great-circle distance between fixes
//! - **Polyline Length**: Total distance along a path
//! - **Weighted Average**: Blend two fixes
//! - **Interpolation**: Evenly timed points between two fixes
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use run_tracker::algorithms::{haversine_distance, GeoPoint, SmoothingOutcome, TrackSmoother};
//!
//! let start = Utc::now();
//! let a = GeoPoint::new(45.0, 7.0, start);
//! let b = GeoPoint::new(45.0004, 7.0, start + Duration::seconds(10));
//! println!("raw hop: {:.1} m", haversine_distance(&a, &b));
//!
//! let smoother = TrackSmoother::default();
//! match smoother.process(Some(&a), &b) {
//!     SmoothingOutcome::Accepted(step) => println!("accepted {:.1} m", step.distance),
//!     other => println!("{:?}", other),
//! }
//! ```
//!
//! [`RunSession`]: crate::RunSession

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{
    GeoPoint,
    RouteSegment,
    SmootherConfig,
    SmoothingBand,
    TrackingConfig,
};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    haversine_distance,
    interpolate,
    meters_to_degrees,
    polyline_length,
    weighted_average,
};

// =============================================================================
// Track Smoothing
// =============================================================================

/// Stateless smoother: previous logical point + raw fix -> outcome
pub use crate::smoothing::TrackSmoother;
/// Result of processing one fix
pub use crate::smoothing::{AcceptedStep, RejectReason, SmoothingOutcome};

// =============================================================================
// Energy
// =============================================================================

pub use crate::energy::{ActivityKind, EnergyModel, EnergyModelRegistry, MetEnergyModel};

// =============================================================================
// Details & Pace
// =============================================================================

/// Buffer of per-step records with compaction and live pace
pub use crate::details::DetailCompactor;
pub use crate::details::{CompactedSample, DetailRecord, PaceWindow, QuantitySample, SampleKind};

// =============================================================================
// Duration
// =============================================================================

/// Pause/resume log with active duration
pub use crate::duration::SessionDurationTracker;
pub use crate::duration::{ActivityEvent, EventKind};
