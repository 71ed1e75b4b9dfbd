//! # Persistence hand-off
//!
//! The session never blocks on storage. Route batches and the final commit
//! are queued to a per-session background writer:
//! - Route inserts are fire-and-forget, counted by a pending counter
//! - The commit job sits behind every insert issued before it, so it only
//!   runs once the counter has dropped to zero
//! - A discarded session never reaches the commit step
//!
//! Storage itself is behind the [`PersistenceSink`] trait. [`MemorySink`]
//! keeps everything in memory; [`SqliteSink`] (feature `persistence`) writes
//! to SQLite.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::details::{CompactedSample, QuantitySample};
use crate::duration::ActivityEvent;
use crate::energy::ActivityKind;
use crate::error::{OptionExt, Result, TrackerError};
use crate::view::CompletedRun;
use crate::GeoPoint;

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection};

// ============================================================================
// Sink & permission interfaces
// ============================================================================

/// Identifier a sink assigns to a saved workout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkoutId(pub i64);

/// Summary handed to the sink when a run is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub kind: ActivityKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Meters
    pub total_distance: f64,
    /// Kilocalories
    pub total_energy: f64,
    pub events: Vec<ActivityEvent>,
}

impl WorkoutRecord {
    pub fn from_run(run: &CompletedRun) -> Self {
        Self {
            kind: run.kind,
            start: run.start,
            end: run.end,
            total_distance: run.total_distance,
            total_energy: run.total_energy,
            events: run.events.clone(),
        }
    }
}

/// Durable storage for finished runs.
///
/// One sink serves one session: route batches inserted before the commit
/// belong to the workout passed to `finish_route`.
pub trait PersistenceSink: Send + Sync {
    /// Append a batch of logical route positions.
    fn insert_route(&self, points: &[GeoPoint]) -> Result<()>;

    /// Store the workout summary.
    fn save_workout(&self, workout: &WorkoutRecord) -> Result<WorkoutId>;

    /// Attach every inserted route position to `workout`.
    fn finish_route(&self, workout: WorkoutId) -> Result<()>;

    /// Attach distance/energy samples to `workout`.
    fn add_samples(&self, workout: WorkoutId, samples: &[QuantitySample]) -> Result<()>;

    /// Forget route positions that will never be committed.
    fn discard_route(&self) {}
}

/// What the user allowed us to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePermission {
    /// Workouts or routes cannot be written
    None,
    /// Workouts and routes, but not distance/energy samples
    Partial,
    Full,
}

/// Source of the current write permission.
pub trait PermissionOracle: Send + Sync {
    fn write_permission(&self) -> WritePermission;
}

impl PermissionOracle for WritePermission {
    fn write_permission(&self) -> WritePermission {
        *self
    }
}

// ============================================================================
// Finish results
// ============================================================================

/// How the commit of a finished run went.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Workout and route saved, with `samples` quantity samples attached
    Saved { samples: usize },
    /// Workout saved, but the route or samples were not
    Incomplete { error: TrackerError },
    /// Write permission was `None`, nothing was saved
    Skipped,
    /// The workout itself could not be saved
    Failed { error: TrackerError },
}

impl SaveOutcome {
    /// Whether the workout summary reached the sink.
    pub fn workout_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. } | SaveOutcome::Incomplete { .. })
    }
}

/// The finished run and what happened to it in storage.
#[derive(Debug)]
pub struct FinishReport {
    pub run: CompletedRun,
    pub outcome: SaveOutcome,
}

/// Pending result of [`crate::RunSession::finish`].
///
/// Resolves once every route insert issued before the finish has completed
/// and the commit has run.
#[derive(Debug)]
pub struct FinishHandle {
    receiver: mpsc::Receiver<FinishReport>,
    fallback: CompletedRun,
}

impl FinishHandle {
    fn fallback_report(fallback: CompletedRun) -> FinishReport {
        FinishReport {
            run: fallback,
            outcome: SaveOutcome::Failed {
                error: TrackerError::persistence("route writer stopped before committing"),
            },
        }
    }

    /// Check if the commit is complete (non-blocking). Gives the handle back
    /// while it is still pending.
    pub fn try_recv(self) -> std::result::Result<FinishReport, FinishHandle> {
        match self.receiver.try_recv() {
            Ok(report) => Ok(report),
            Err(mpsc::TryRecvError::Empty) => Err(self),
            Err(mpsc::TryRecvError::Disconnected) => Ok(Self::fallback_report(self.fallback)),
        }
    }

    /// Wait for the commit to complete (blocking).
    ///
    /// The run is returned even if the writer died; the outcome says so.
    pub fn wait(self) -> FinishReport {
        match self.receiver.recv() {
            Ok(report) => report,
            Err(_) => Self::fallback_report(self.fallback),
        }
    }
}

// ============================================================================
// Route writer
// ============================================================================

enum WriteJob {
    Insert(Vec<GeoPoint>),
    Commit(Box<CommitJob>),
}

struct CommitJob {
    run: CompletedRun,
    samples: Vec<CompactedSample>,
    reply: mpsc::Sender<FinishReport>,
}

/// Background writer owned by one session.
pub struct RouteWriter {
    sender: mpsc::Sender<WriteJob>,
    pending: Arc<AtomicUsize>,
    discarded: Arc<AtomicBool>,
}

impl RouteWriter {
    /// Start the writer thread for a session.
    pub fn spawn(
        sink: Arc<dyn PersistenceSink>,
        permissions: Arc<dyn PermissionOracle>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let discarded = Arc::new(AtomicBool::new(false));

        let worker_pending = Arc::clone(&pending);
        let worker_discarded = Arc::clone(&discarded);
        thread::Builder::new()
            .name("route-writer".to_string())
            .spawn(move || {
                run_worker(rx, sink, permissions, worker_pending, worker_discarded)
            })?;

        Ok(Self {
            sender: tx,
            pending,
            discarded,
        })
    }

    /// Queue a batch of route positions (fire-and-forget).
    pub fn insert(&self, points: Vec<GeoPoint>) {
        if points.is_empty() {
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(WriteJob::Insert(points)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("[RouteWriter] Writer thread gone, dropping route batch");
        }
    }

    /// Route inserts issued but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue the commit behind every pending insert.
    pub fn commit(self, run: CompletedRun, samples: Vec<CompactedSample>) -> FinishHandle {
        let (reply, receiver) = mpsc::channel();
        let pending = self.pending();
        if pending > 0 {
            info!(
                "[RouteWriter] Commit queued behind {} pending route inserts",
                pending
            );
        }

        let fallback = run.clone();
        let job = CommitJob {
            run,
            samples,
            reply,
        };
        if self.sender.send(WriteJob::Commit(Box::new(job))).is_err() {
            warn!("[RouteWriter] Writer thread gone, run will not be saved");
        }
        FinishHandle { receiver, fallback }
    }

    /// Stop without committing. Queued inserts are skipped.
    pub fn discard(self) {
        self.discarded.store(true, Ordering::SeqCst);
    }
}

fn run_worker(
    rx: mpsc::Receiver<WriteJob>,
    sink: Arc<dyn PersistenceSink>,
    permissions: Arc<dyn PermissionOracle>,
    pending: Arc<AtomicUsize>,
    discarded: Arc<AtomicBool>,
) {
    while let Ok(job) = rx.recv() {
        match job {
            WriteJob::Insert(points) => {
                if !discarded.load(Ordering::SeqCst) {
                    if let Err(e) = sink.insert_route(&points) {
                        warn!("[RouteWriter] Route insert failed: {}", e);
                    }
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            WriteJob::Commit(job) => {
                debug_assert_eq!(pending.load(Ordering::SeqCst), 0);
                let CommitJob {
                    run,
                    samples,
                    reply,
                } = *job;
                let outcome = commit_run(
                    sink.as_ref(),
                    permissions.write_permission(),
                    &run,
                    &samples,
                );
                let _ = reply.send(FinishReport { run, outcome });
                return;
            }
        }
    }

    // Sender dropped without a commit
    debug!("[RouteWriter] Session ended without commit, discarding route");
    sink.discard_route();
}

fn commit_run(
    sink: &dyn PersistenceSink,
    permission: WritePermission,
    run: &CompletedRun,
    samples: &[CompactedSample],
) -> SaveOutcome {
    if permission == WritePermission::None {
        info!("[RouteWriter] No write permission, skipping save");
        sink.discard_route();
        return SaveOutcome::Skipped;
    }

    let workout = match sink.save_workout(&WorkoutRecord::from_run(run)) {
        Ok(id) => id,
        Err(error) => {
            warn!("[RouteWriter] Workout save failed: {}", error);
            sink.discard_route();
            return SaveOutcome::Failed { error };
        }
    };

    if let Err(error) = sink.finish_route(workout) {
        warn!("[RouteWriter] Route save failed: {}", error);
        return SaveOutcome::Incomplete { error };
    }

    if permission != WritePermission::Full || samples.is_empty() {
        return SaveOutcome::Saved { samples: 0 };
    }

    let quantities: Vec<QuantitySample> = samples
        .iter()
        .flat_map(|s| s.quantity_samples())
        .collect();
    match sink.add_samples(workout, &quantities) {
        Ok(()) => {
            info!(
                "[RouteWriter] Saved workout {:?} with {} samples",
                workout,
                quantities.len()
            );
            SaveOutcome::Saved {
                samples: quantities.len(),
            }
        }
        Err(error) => {
            warn!("[RouteWriter] Sample save failed: {}", error);
            SaveOutcome::Incomplete { error }
        }
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Contents of a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Route positions not yet attached to a workout
    pub pending_route: Vec<GeoPoint>,
    pub insert_batches: usize,
    pub workouts: Vec<(WorkoutId, WorkoutRecord)>,
    pub routes: Vec<(WorkoutId, Vec<GeoPoint>)>,
    pub samples: Vec<(WorkoutId, QuantitySample)>,
    pub route_discarded: bool,
}

/// Sink keeping everything in memory, with failure injection for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    store: Mutex<MemoryStore>,
    fail_workouts: bool,
    fail_samples: bool,
    insert_delay: Option<std::time::Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `save_workout` always fails.
    pub fn failing() -> Self {
        Self {
            fail_workouts: true,
            ..Self::default()
        }
    }

    /// A sink whose `add_samples` always fails.
    pub fn failing_samples() -> Self {
        Self {
            fail_samples: true,
            ..Self::default()
        }
    }

    /// Make each route insert take `delay`.
    pub fn with_insert_delay(mut self, delay: std::time::Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// Copy of the stored data.
    pub fn snapshot(&self) -> MemoryStore {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut MemoryStore) -> Result<T>) -> Result<T> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| TrackerError::persistence("memory sink poisoned"))?;
        f(&mut store)
    }
}

impl PersistenceSink for MemorySink {
    fn insert_route(&self, points: &[GeoPoint]) -> Result<()> {
        if let Some(delay) = self.insert_delay {
            thread::sleep(delay);
        }
        self.with_store(|store| {
            store.pending_route.extend_from_slice(points);
            store.insert_batches += 1;
            Ok(())
        })
    }

    fn save_workout(&self, workout: &WorkoutRecord) -> Result<WorkoutId> {
        if self.fail_workouts {
            return Err(TrackerError::persistence("workout rejected"));
        }
        self.with_store(|store| {
            let id = WorkoutId(store.workouts.len() as i64 + 1);
            store.workouts.push((id, workout.clone()));
            Ok(id)
        })
    }

    fn finish_route(&self, workout: WorkoutId) -> Result<()> {
        self.with_store(|store| {
            store
                .workouts
                .iter()
                .find(|(id, _)| *id == workout)
                .ok_or_persistence("unknown workout")?;
            let route = std::mem::take(&mut store.pending_route);
            store.routes.push((workout, route));
            Ok(())
        })
    }

    fn add_samples(&self, workout: WorkoutId, samples: &[QuantitySample]) -> Result<()> {
        if self.fail_samples {
            return Err(TrackerError::persistence("samples rejected"));
        }
        self.with_store(|store| {
            store
                .samples
                .extend(samples.iter().map(|s| (workout, *s)));
            Ok(())
        })
    }

    fn discard_route(&self) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.pending_route.clear();
        store.route_discarded = true;
    }
}

// ============================================================================
// SQLite sink
// ============================================================================

/// Sink writing workouts, routes and samples to SQLite.
#[cfg(feature = "persistence")]
pub struct SqliteSink {
    db: Mutex<Connection>,
}

#[cfg(feature = "persistence")]
impl SqliteSink {
    /// Open (or create) a database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteSink] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- Workout summaries
            CREATE TABLE IF NOT EXISTS workouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity_kind TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                total_distance REAL NOT NULL,
                total_energy REAL NOT NULL,
                events TEXT NOT NULL
            );

            -- Logical route positions, workout_id NULL until committed
            CREATE TABLE IF NOT EXISTS route_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workout_id INTEGER,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude REAL NOT NULL,
                horizontal_accuracy REAL NOT NULL,
                vertical_accuracy REAL NOT NULL,
                course REAL NOT NULL,
                speed REAL NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                FOREIGN KEY (workout_id) REFERENCES workouts(id) ON DELETE CASCADE
            );

            -- Compacted distance/energy samples
            CREATE TABLE IF NOT EXISTS samples (
                workout_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                value REAL NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                FOREIGN KEY (workout_id) REFERENCES workouts(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_route_points_workout ON route_points(workout_id);
            CREATE INDEX IF NOT EXISTS idx_samples_workout ON samples(workout_id);
            "#,
        )
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrackerError::persistence("sqlite connection poisoned"))
    }

    /// Number of saved workouts.
    pub fn workout_count(&self) -> Result<usize> {
        let db = self.lock()?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM workouts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Load a saved workout summary.
    pub fn load_workout(&self, workout: WorkoutId) -> Result<WorkoutRecord> {
        let db = self.lock()?;
        let (kind, start_ms, end_ms, total_distance, total_energy, events): (
            String,
            i64,
            i64,
            f64,
            f64,
            String,
        ) = db.query_row(
            "SELECT activity_kind, start_ms, end_ms, total_distance, total_energy, events
             FROM workouts WHERE id = ?1",
            params![workout.0],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        Ok(WorkoutRecord {
            kind: kind.parse()?,
            start: from_millis(start_ms)?,
            end: from_millis(end_ms)?,
            total_distance,
            total_energy,
            events: serde_json::from_str(&events)?,
        })
    }

    /// Route positions committed with `workout`, in insertion order.
    pub fn route_points(&self, workout: WorkoutId) -> Result<Vec<GeoPoint>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT latitude, longitude, altitude, horizontal_accuracy, vertical_accuracy,
                    course, speed, timestamp_ms
             FROM route_points WHERE workout_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![workout.0], |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(lat, lon, alt, h_acc, v_acc, course, speed, ts)| {
                Ok(GeoPoint::new(lat, lon, from_millis(ts)?)
                    .with_altitude(alt)
                    .with_accuracy(h_acc, v_acc)
                    .with_motion(course, speed))
            })
            .collect()
    }

    /// Number of quantity samples attached to `workout`.
    pub fn sample_count(&self, workout: WorkoutId) -> Result<usize> {
        let db = self.lock()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM samples WHERE workout_id = ?1",
            params![workout.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(feature = "persistence")]
fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    use chrono::TimeZone;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_persistence("timestamp out of range")
}

#[cfg(feature = "persistence")]
impl PersistenceSink for SqliteSink {
    fn insert_route(&self, points: &[GeoPoint]) -> Result<()> {
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO route_points (workout_id, latitude, longitude, altitude,
                    horizontal_accuracy, vertical_accuracy, course, speed, timestamp_ms)
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for p in points {
                stmt.execute(params![
                    p.latitude,
                    p.longitude,
                    p.altitude,
                    p.horizontal_accuracy,
                    p.vertical_accuracy,
                    p.course,
                    p.speed,
                    p.timestamp.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_workout(&self, workout: &WorkoutRecord) -> Result<WorkoutId> {
        let events = serde_json::to_string(&workout.events)?;
        let db = self.lock()?;
        db.execute(
            "INSERT INTO workouts (activity_kind, start_ms, end_ms, total_distance, total_energy, events)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                workout.kind.as_str(),
                workout.start.timestamp_millis(),
                workout.end.timestamp_millis(),
                workout.total_distance,
                workout.total_energy,
                events,
            ],
        )?;
        Ok(WorkoutId(db.last_insert_rowid()))
    }

    fn finish_route(&self, workout: WorkoutId) -> Result<()> {
        let db = self.lock()?;
        let attached = db.execute(
            "UPDATE route_points SET workout_id = ?1 WHERE workout_id IS NULL",
            params![workout.0],
        )?;
        debug!(
            "[SqliteSink] Attached {} route points to workout {}",
            attached, workout.0
        );
        Ok(())
    }

    fn add_samples(&self, workout: WorkoutId, samples: &[QuantitySample]) -> Result<()> {
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO samples (workout_id, kind, value, start_ms, end_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in samples {
                let kind = match s.kind {
                    crate::details::SampleKind::Distance => "distance",
                    crate::details::SampleKind::Energy => "energy",
                };
                stmt.execute(params![
                    workout.0,
                    kind,
                    s.value,
                    s.start.timestamp_millis(),
                    s.end.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn discard_route(&self) {
        let result = self.lock().and_then(|db| {
            db.execute("DELETE FROM route_points WHERE workout_id IS NULL", [])
                .map_err(TrackerError::from)
        });
        if let Err(e) = result {
            warn!("[SqliteSink] Failed to discard route: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
