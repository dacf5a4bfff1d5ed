//! Automatic snapshots on an interval.
//!

use core::time::Duration;
use std::{sync::Arc, thread::JoinHandle, time::Instant};

use tracing::{error, info, warn};

use crate::service::{BackupService, SnapshotError, SnapshotPlan, SnapshotReport};

type Worker = JoinHandle<Result<SnapshotReport, SnapshotError>>;

/// What a call to [`Scheduler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing is due.
    Idle,
    /// A snapshot is still running.
    Running,
    /// A snapshot was started.
    Started,
}

/// Decides when the next snapshot is due and runs it on a worker thread.
///
/// A snapshot is due when no snapshot has succeeded yet, or when `interval` has passed since the
/// start of the last successful one. Failed snapshots do not reset the clock.
pub struct Scheduler {
    interval: Duration,
    last_success: Option<Instant>,
    in_flight: Option<(Instant, Worker)>,
}

impl Scheduler {
    /// A scheduler that snapshots every `interval_minutes`.
    pub fn new(interval_minutes: u64) -> Self {
        Self::with_interval(Duration::from_secs(interval_minutes.saturating_mul(60)))
    }

    /// A scheduler that snapshots every `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_success: None,
            in_flight: None,
        }
    }

    /// When the last successful snapshot started.
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Returns if a snapshot should start at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_success {
            Some(last_success) => now.saturating_duration_since(last_success) >= self.interval,
            None => true,
        }
    }

    /// Record a successful snapshot that started at `started`.
    pub fn record_success(&mut self, started: Instant) {
        self.last_success = Some(started);
    }

    /// Collect a finished snapshot, then start a new one if it is due.
    pub fn tick(&mut self, service: &Arc<BackupService>, plan: &SnapshotPlan) -> Tick {
        if let Some((started, worker)) = self.in_flight.take() {
            if !worker.is_finished() {
                self.in_flight = Some((started, worker));
                return Tick::Running;
            }

            self.collect(started, worker);
        }

        let now = Instant::now();
        if !self.is_due(now) {
            return Tick::Idle;
        }

        info!("Starting automatic snapshot");
        match service.spawn_snapshot(plan.clone()) {
            Ok(worker) => {
                self.in_flight = Some((now, worker));
                Tick::Started
            }
            Err(error) => {
                error!("Could not start snapshot worker: {error}");
                Tick::Idle
            }
        }
    }

    /// Block until the running snapshot, if any, finishes and collect it.
    pub fn wait(&mut self) {
        let Some((started, worker)) = self.in_flight.take() else {
            return;
        };

        self.collect(started, worker);
    }

    fn collect(&mut self, started: Instant, worker: Worker) {
        match worker.join() {
            Ok(Ok(report)) => {
                info!("Automatic snapshot {:?} succeeded", report.path);
                self.record_success(started);
            }
            Ok(Err(error)) => warn!("Automatic snapshot failed: {error}"),
            Err(_) => error!("Automatic snapshot worker panicked"),
        }
    }
}
