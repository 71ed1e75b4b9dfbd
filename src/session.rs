//! # Run Session
//!
//! Single-owner state machine for one tracked activity.
//!
//! ```text
//! NotStarted --start--> Active --finish--> Finished
//!                         |  \--discard--> Discarded
//!                         '-- pause/resume (stays Active)
//! ```
//!
//! The session is not internally synchronized: one owner drives `ingest`,
//! `pause`, `resume`, `finish` and `discard`. Storage runs on the session's
//! [`RouteWriter`] thread and never blocks these calls.
//!
//! Misuse (starting twice, mutating a finished or discarded session, double
//! pause) panics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::TrackingConfig;
use crate::details::{DetailCompactor, DetailRecord};
use crate::duration::SessionDurationTracker;
use crate::energy::{ActivityKind, EnergyModel, EnergyModelRegistry};
use crate::error::Result;
use crate::persistence::{FinishHandle, PermissionOracle, PersistenceSink, RouteWriter};
use crate::preferences::Preferences;
use crate::smoothing::{RejectReason, SmoothingOutcome, TrackSmoother};
use crate::view::{CompletedRun, RunSnapshot, RunView};
use crate::{GeoPoint, RouteSegment};

/// Top-level state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Active,
    Finished,
    Discarded,
}

/// Mutable state of a started activity.
struct ActiveRun {
    kind: ActivityKind,
    start: DateTime<Utc>,
    mass_kg: f64,
    energy_model: Arc<dyn EnergyModel>,
    writer: RouteWriter,
}

/// One tracked activity, from start to finish or discard.
pub struct RunSession {
    lifecycle: Lifecycle,
    config: TrackingConfig,
    registry: EnergyModelRegistry,
    sink: Arc<dyn PersistenceSink>,
    permissions: Arc<dyn PermissionOracle>,

    smoother: TrackSmoother,
    compactor: DetailCompactor,
    durations: SessionDurationTracker,
    active: Option<ActiveRun>,

    total_distance: f64,
    total_energy: f64,
    current_pace: Option<f64>,
    route: Vec<RouteSegment>,

    /// Previous logical position fed to the smoother (reset on resume)
    previous: Option<GeoPoint>,
    /// Most recent logical position of the whole session
    last_logical: Option<GeoPoint>,
    /// Most recent fix received, processed or not
    last_raw: Option<GeoPoint>,
    start_position: Option<GeoPoint>,
    end_position: Option<GeoPoint>,
}

impl RunSession {
    /// Create a session that has not started yet.
    pub fn new(
        config: TrackingConfig,
        registry: EnergyModelRegistry,
        sink: Arc<dyn PersistenceSink>,
        permissions: Arc<dyn PermissionOracle>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::NotStarted,
            smoother: TrackSmoother::new(config.smoother.clone()),
            compactor: DetailCompactor::new(config.details_time_precision),
            durations: SessionDurationTracker::new(),
            active: None,
            config,
            registry,
            sink,
            permissions,
            total_distance: 0.0,
            total_energy: 0.0,
            current_pace: None,
            route: Vec::new(),
            previous: None,
            last_logical: None,
            last_raw: None,
            start_position: None,
            end_position: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin tracking.
    ///
    /// Fails if the configuration is invalid, no energy model is registered
    /// for `kind`, or the writer thread cannot be started.
    ///
    /// # Panics
    /// If the session was already started.
    pub fn start(&mut self, kind: ActivityKind, mass_kg: f64, at: DateTime<Utc>) -> Result<()> {
        assert_eq!(
            self.lifecycle,
            Lifecycle::NotStarted,
            "session already started"
        );
        self.config.validate()?;
        let energy_model = self.registry.get(kind)?;
        let writer = RouteWriter::spawn(Arc::clone(&self.sink), Arc::clone(&self.permissions))?;

        self.active = Some(ActiveRun {
            kind,
            start: at,
            mass_kg,
            energy_model,
            writer,
        });
        self.lifecycle = Lifecycle::Active;
        info!(
            "[RunSession] Started {} at {} ({:.1} kg)",
            kind, at, mass_kg
        );
        Ok(())
    }

    /// Begin tracking with the kind and body mass from `preferences`.
    pub fn start_with_preferences(
        &mut self,
        preferences: &Preferences,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.start(preferences.activity_kind, preferences.effective_mass(), at)
    }

    fn assert_active(&self) {
        assert_eq!(
            self.lifecycle,
            Lifecycle::Active,
            "session is not active"
        );
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_completed(&self) -> bool {
        self.lifecycle == Lifecycle::Finished
    }

    /// Finished or discarded: no further mutation allowed.
    pub fn is_invalidated(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Finished | Lifecycle::Discarded)
    }

    // ========================================================================
    // Position feed
    // ========================================================================

    /// Feed raw fixes. Returns the route segments they produced.
    ///
    /// While paused, fixes are only remembered as the last raw position.
    ///
    /// # Panics
    /// If the session is not active.
    pub fn ingest(&mut self, positions: &[GeoPoint]) -> Vec<RouteSegment> {
        self.assert_active();

        if let Some(last) = positions.last() {
            self.last_raw = Some(*last);
        }
        if self.durations.is_paused() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut logical_positions = Vec::new();

        for raw in positions {
            if !raw.is_valid() {
                debug!("[RunSession] Skipping invalid fix at {}", raw.timestamp);
                continue;
            }

            // After a resume the smoother has no previous point, so late fixes
            // are held to the last logical timestamp here
            if self.previous.is_none() {
                if let Some(floor) = self.last_logical {
                    if raw.timestamp <= floor.timestamp {
                        debug!(
                            "[RunSession] Rejected fix at {}: {:?}",
                            raw.timestamp,
                            RejectReason::NonIncreasingTime
                        );
                        continue;
                    }
                }
            }

            match self.smoother.process(self.previous.as_ref(), raw) {
                SmoothingOutcome::First(point) => {
                    if self.start_position.is_none() {
                        self.start_position = Some(point);
                    }
                    logical_positions.push(point);
                    self.previous = Some(point);
                    self.last_logical = Some(point);
                }
                SmoothingOutcome::Accepted(step) => {
                    self.record_detail(step.distance, step.start, step.end);
                    logical_positions.extend_from_slice(&step.segment.points()[1..]);
                    self.previous = Some(step.point);
                    self.last_logical = Some(step.point);
                    segments.push(step.segment);
                }
                SmoothingOutcome::Rejected(reason) => {
                    debug!(
                        "[RunSession] Rejected fix at {}: {:?}",
                        raw.timestamp, reason
                    );
                }
            }
        }

        self.route.extend(segments.iter().cloned());
        if let Some(active) = &self.active {
            active.writer.insert(logical_positions);
        }
        segments
    }

    /// Account one accepted step: energy, totals, pace and compaction.
    fn record_detail(&mut self, distance: f64, start: DateTime<Utc>, end: DateTime<Utc>) {
        let energy = match &self.active {
            Some(active) if distance > 0.0 => active.energy_model.energy(
                crate::seconds_between(start, end),
                distance,
                active.mass_kg,
            ),
            _ => 0.0,
        };

        self.total_distance += distance;
        self.total_energy += energy;
        self.compactor
            .append(DetailRecord::new(distance, energy, start, end));

        let window = self.compactor.pace_window(self.config.pace_window);
        self.current_pace = window.pace;

        if let Some(sample) = self.compactor.compact(false) {
            debug!(
                "[RunSession] Compacted {:.1} m / {:.2} kcal over {}..{}",
                sample.total_distance, sample.total_energy, sample.start, sample.end
            );
        }
        self.compactor.trim_history(window.record_count);
    }

    // ========================================================================
    // Pause / resume
    // ========================================================================

    /// # Panics
    /// If the session is not active or already paused.
    pub fn pause(&mut self, at: DateTime<Utc>) {
        self.assert_active();
        self.durations.pause(at);
        info!("[RunSession] Paused at {}", at);
    }

    /// Resume tracking. Smoothing restarts from the next fix so the paused
    /// gap is not counted as distance.
    ///
    /// # Panics
    /// If the session is not active or not paused.
    pub fn resume(&mut self, at: DateTime<Utc>) {
        self.assert_active();
        self.durations.resume(at);
        self.previous = None;
        info!("[RunSession] Resumed at {}", at);
    }

    pub fn is_paused(&self) -> bool {
        self.durations.is_paused()
    }

    // ========================================================================
    // Finish / discard
    // ========================================================================

    /// End the run and commit it.
    ///
    /// Returns `None`, discarding the session, when no position was ever
    /// accepted. Otherwise the handle resolves, after every pending route
    /// insert, to the completed run and the outcome of saving it.
    ///
    /// # Panics
    /// If the session is not active (finishing twice included).
    pub fn finish(&mut self, end: DateTime<Utc>) -> Option<FinishHandle> {
        self.assert_active();

        self.compactor.compact(true);
        self.compactor.clear_records();
        self.durations.close(end);
        self.current_pace = None;

        if let Some(last) = self.last_logical {
            if self.route.is_empty() {
                // A single accepted position: keep it as a dot
                self.route.push(RouteSegment::dot(last));
                self.start_position = Some(last);
            }
            self.end_position = Some(last);
        }

        if self.route.is_empty() {
            info!("[RunSession] Finished without positions, discarding");
            self.discard();
            return None;
        }

        let active = self.active.take()?;
        self.lifecycle = Lifecycle::Finished;

        let run = CompletedRun {
            kind: active.kind,
            start: active.start,
            end,
            duration_secs: as_seconds(self.durations.active_duration(end, active.start)),
            total_distance: self.total_distance,
            total_energy: self.total_energy,
            route: self.route.clone(),
            events: self.durations.events().to_vec(),
            start_position: self.start_position,
            end_position: self.end_position,
        };
        info!(
            "[RunSession] Finished {}: {:.0} m, {:.1} kcal, {:.0} s",
            run.kind, run.total_distance, run.total_energy, run.duration_secs
        );

        Some(active.writer.commit(run, self.compactor.take_samples()))
    }

    /// Abandon the session. Safe to call more than once; nothing is
    /// committed and pending route inserts are dropped.
    ///
    /// # Panics
    /// If the session already finished.
    pub fn discard(&mut self) {
        assert_ne!(
            self.lifecycle,
            Lifecycle::Finished,
            "session already finished"
        );
        if self.lifecycle == Lifecycle::Discarded {
            return;
        }
        if let Some(active) = self.active.take() {
            active.writer.discard();
        }
        self.lifecycle = Lifecycle::Discarded;
        self.route.clear();
        self.compactor.clear_records();
        info!("[RunSession] Discarded");
    }

    // ========================================================================
    // Live state
    // ========================================================================

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    /// Seconds per kilometer over the trailing pace window.
    pub fn current_pace(&self) -> Option<f64> {
        self.current_pace
    }

    pub fn route(&self) -> &[RouteSegment] {
        &self.route
    }

    pub fn last_raw_position(&self) -> Option<&GeoPoint> {
        self.last_raw.as_ref()
    }

    pub fn start_position(&self) -> Option<&GeoPoint> {
        self.start_position.as_ref()
    }

    /// Route inserts issued but not yet stored.
    pub fn pending_inserts(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.writer.pending())
    }

    /// Active seconds as of `now`.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        match &self.active {
            Some(active) => as_seconds(self.durations.active_duration(now, active.start)),
            None => 0.0,
        }
    }

    /// In-progress view, `None` unless active.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Option<RunSnapshot> {
        let active = self.active.as_ref()?;
        Some(RunSnapshot {
            kind: active.kind,
            start: active.start,
            now,
            duration_secs: self.duration_secs(now),
            total_distance: self.total_distance,
            total_energy: self.total_energy,
            current_pace: self.current_pace,
            paused: self.durations.is_paused(),
            route: self.route.clone(),
            events: self.durations.events().to_vec(),
            start_position: self.start_position,
        })
    }

    pub fn view(&self, now: DateTime<Utc>) -> Option<RunView> {
        self.snapshot(now).map(RunView::InProgress)
    }
}

fn as_seconds(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::meters_to_degrees;
    use crate::persistence::{MemorySink, SaveOutcome, WritePermission};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_546_800 + secs, 0).unwrap()
    }

    fn north(meters: f64, secs: i64) -> GeoPoint {
        GeoPoint::new(45.0 + meters_to_degrees(meters), 7.0, at(secs))
    }

    fn session_with(sink: Arc<MemorySink>) -> RunSession {
        RunSession::new(
            TrackingConfig::default(),
            EnergyModelRegistry::default(),
            sink,
            Arc::new(WritePermission::Full),
        )
    }

    fn started() -> (RunSession, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut session = session_with(sink.clone());
        session.start(ActivityKind::Run, 60.0, at(0)).unwrap();
        (session, sink)
    }

    #[test]
    fn test_start_requires_energy_model() {
        let mut session = RunSession::new(
            TrackingConfig::default(),
            EnergyModelRegistry::empty(),
            Arc::new(MemorySink::new()),
            Arc::new(WritePermission::Full),
        );
        assert!(session.start(ActivityKind::Walk, 60.0, at(0)).is_err());
        assert_eq!(session.lifecycle(), Lifecycle::NotStarted);
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn test_double_start_panics() {
        let (mut session, _) = started();
        let _ = session.start(ActivityKind::Run, 60.0, at(1));
    }

    #[test]
    #[should_panic(expected = "not active")]
    fn test_ingest_before_start_panics() {
        let mut session = session_with(Arc::new(MemorySink::new()));
        session.ingest(&[north(0.0, 0)]);
    }

    #[test]
    fn test_ingest_accumulates() {
        let (mut session, _) = started();
        let fixes: Vec<GeoPoint> = (0..=6).map(|i| north(i as f64 * 40.0, i * 10)).collect();
        let segments = session.ingest(&fixes);

        assert_eq!(segments.len(), 6);
        assert_eq!(session.route().len(), 6);
        assert!(session.total_distance() > 200.0 && session.total_distance() < 241.0);
        assert!(session.total_energy() > 0.0);
        assert!(session.current_pace().is_some());
        assert_eq!(session.start_position(), Some(&fixes[0]));
    }

    #[test]
    fn test_rejected_fixes_leave_totals() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0), north(2.0, 1), north(200.0, 2)]);
        assert_eq!(session.total_distance(), 0.0);
        assert!(session.route().is_empty());
    }

    #[test]
    fn test_paused_fixes_are_not_counted() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0), north(40.0, 10)]);
        let before = session.total_distance();

        session.pause(at(10));
        assert!(session.ingest(&[north(80.0, 20)]).is_empty());
        assert_eq!(session.last_raw_position(), Some(&north(80.0, 20)));
        session.resume(at(60));

        // Smoothing restarts at the first fix after resume
        session.ingest(&[north(500.0, 61)]);
        assert_eq!(session.total_distance(), before);
        session.ingest(&[north(540.0, 71)]);
        assert!(session.total_distance() > before + 30.0);

        let snapshot = session.snapshot(at(71)).unwrap();
        assert_eq!(snapshot.duration_secs, 21.0);
        assert!(!snapshot.paused);
    }

    #[test]
    fn test_finish_without_positions_discards() {
        let (mut session, _) = started();
        assert!(session.finish(at(30)).is_none());
        assert_eq!(session.lifecycle(), Lifecycle::Discarded);
    }

    #[test]
    fn test_single_position_finishes_as_dot() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0)]);
        let report = session.finish(at(30)).unwrap().wait();

        assert_eq!(report.run.route.len(), 1);
        assert_eq!(report.run.route[0].len(), 1);
        assert_eq!(report.run.start_position, report.run.end_position);
        assert_eq!(report.run.total_distance, 0.0);
    }

    #[test]
    fn test_finish_closes_open_pause() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0), north(40.0, 10)]);
        session.pause(at(20));
        let report = session.finish(at(50)).unwrap().wait();

        assert_eq!(report.run.events.len(), 2);
        assert_eq!(report.run.duration_secs, 20.0);
        assert!(session.is_completed());
        assert!(session.is_invalidated());
    }

    #[test]
    fn test_finish_commits_to_sink() {
        let (mut session, sink) = started();
        let fixes: Vec<GeoPoint> = (0..=6).map(|i| north(i as f64 * 40.0, i * 10)).collect();
        session.ingest(&fixes);
        let report = session.finish(at(60)).unwrap().wait();

        assert!(matches!(report.outcome, SaveOutcome::Saved { samples } if samples > 0));
        let store = sink.snapshot();
        assert_eq!(store.workouts.len(), 1);
        let distance: f64 = store
            .samples
            .iter()
            .filter(|(_, s)| s.kind == crate::SampleKind::Distance)
            .map(|(_, s)| s.value)
            .sum();
        assert!((distance - report.run.total_distance).abs() < 1e-6);
        assert_eq!(session.pending_inserts(), 0);
    }

    #[test]
    #[should_panic(expected = "not active")]
    fn test_double_finish_panics() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0)]);
        let _ = session.finish(at(10));
        let _ = session.finish(at(20));
    }

    #[test]
    fn test_late_fix_after_resume_is_rejected() {
        let (mut session, sink) = started();
        let fixes: Vec<GeoPoint> = (0..4).map(|i| north(i as f64 * 40.0, i * 10)).collect();
        session.ingest(&fixes);
        let before = session.total_distance();

        session.pause(at(30));
        session.resume(at(40));
        // Stamped before the last logical point
        session.ingest(&[north(200.0, 5), north(240.0, 15)]);
        assert_eq!(session.total_distance(), before);

        session.ingest(&[north(280.0, 45), north(320.0, 55)]);
        assert!(session.total_distance() > before + 35.0);

        session.finish(at(60)).unwrap().wait();
        let mut samples: Vec<_> = sink
            .snapshot()
            .samples
            .into_iter()
            .filter(|(_, s)| s.kind == crate::SampleKind::Distance)
            .map(|(_, s)| s)
            .collect();
        samples.sort_by_key(|s| s.start);
        for s in &samples {
            assert!(s.start <= s.end);
        }
        for w in samples.windows(2) {
            assert!(w[0].end <= w[1].start);
        }
    }

    #[test]
    #[should_panic(expected = "already finished")]
    fn test_discard_after_finish_panics() {
        let (mut session, _) = started();
        session.ingest(&[north(0.0, 0), north(40.0, 10)]);
        session.finish(at(10)).unwrap().wait();
        session.discard();
    }

    #[test]
    fn test_discard_is_idempotent() {
        let (mut session, sink) = started();
        session.ingest(&[north(0.0, 0), north(40.0, 10)]);
        session.discard();
        session.discard();
        assert_eq!(session.lifecycle(), Lifecycle::Discarded);
        assert!(session.snapshot(at(20)).is_none());
        assert!(sink.snapshot().workouts.is_empty());
    }

    #[test]
    #[should_panic(expected = "not active")]
    fn test_finish_after_discard_panics() {
        let (mut session, _) = started();
        session.discard();
        let _ = session.finish(at(10));
    }
}
