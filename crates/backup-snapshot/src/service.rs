//! The snapshot service.
//!
//! [`BackupService`] owns the execution lock, so at most one snapshot is archived at a time. A
//! request made while another snapshot is running blocks until that one finishes, then runs.
//!
//! Each run archives into `<backup directory>/tmp`, renames the finished archive to its final
//! name, then runs retention. Offloading happens after the lock is released. A crash before the
//! rename leaves at most a `tmp` file, which the next run overwrites and retention never
//! considers.
//!

use core::time::Duration;
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
    thread::{self, JoinHandle},
    time::Instant,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    Context,
    archiver::{ArchiveError, ArchiveSummary, Archiver, Exclusions},
    hooks::{HookError, Quiescence},
    notifier::Notifier,
    offload::Offload,
    retention::{self, RetentionLimits, RetentionReport, SNAPSHOT_EXTENSION},
    size::{format_size, total_size},
};

/// The name snapshots are archived under before they are complete.
pub const TEMPORARY_NAME: &str = "tmp";

/// How many seconds [`BackupService::snapshot_now`] waits for a free name.
const NAME_ATTEMPTS: u32 = 3;

/// Everything a snapshot run needs to know. Built from the config for each run, so a reloaded
/// config only affects later runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPlan {
    /// The directory to archive.
    pub source_directory: PathBuf,

    /// The directory snapshots are written to.
    pub backup_directory: PathBuf,

    /// Names left out of the archive.
    pub exclusions: Exclusions,

    /// Limits enforced on the backup directory after each run.
    pub limits: RetentionLimits,
}

/// The outcome of a successful snapshot run.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    /// Where the snapshot was written.
    pub path: PathBuf,

    /// The timestamp embedded in the snapshot.
    pub timestamp: i64,

    /// Size of the snapshot file in bytes.
    pub size: u64,

    /// What was archived.
    pub archive: ArchiveSummary,

    /// What retention did afterwards.
    pub retention: RetentionReport,

    /// How long the run took, not counting time spent waiting for another run.
    pub duration: Duration,
}

/// Creates snapshots one at a time.
pub struct BackupService {
    lock: Mutex<()>,
    notifier: Arc<dyn Notifier>,
    hooks: Arc<dyn Quiescence>,
    offload: Option<Arc<dyn Offload>>,
}

impl BackupService {
    /// Create a new service from its collaborators.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        hooks: Arc<dyn Quiescence>,
        offload: Option<Arc<dyn Offload>>,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            notifier,
            hooks,
            offload,
        }
    }

    /// Run a snapshot named after the current time.
    ///
    /// The name is chosen once the lock is held. If a snapshot with that name already exists this
    /// waits for the next second, so back-to-back requests each get their own snapshot.
    pub fn snapshot_now(&self, plan: &SnapshotPlan) -> Result<SnapshotReport, SnapshotError> {
        let guard = self.acquire();
        let name = name_for_now(&plan.backup_directory);

        self.run(guard, plan, &name)
    }

    /// Run [`Self::snapshot_now`] on a dedicated worker thread.
    pub fn spawn_snapshot(
        self: &Arc<Self>,
        plan: SnapshotPlan,
    ) -> io::Result<JoinHandle<Result<SnapshotReport, SnapshotError>>> {
        let service = Arc::clone(self);

        thread::Builder::new()
            .name("snapshot".to_string())
            .spawn(move || service.snapshot_now(&plan))
    }

    /// Archive the plan's source directory into `<backup directory>/<name>` then enforce
    /// retention.
    ///
    /// Blocks while another snapshot is running. Retention runs whether or not the snapshot was
    /// created. The offload runs after the lock is released.
    pub fn run_snapshot(
        &self,
        plan: &SnapshotPlan,
        name: &str,
    ) -> Result<SnapshotReport, SnapshotError> {
        let guard = self.acquire();

        self.run(guard, plan, name)
    }

    /// Take the execution lock, waiting for a running snapshot to finish.
    fn acquire(&self) -> MutexGuard<'_, ()> {
        // The lock guards no data, a panic while holding it leaves nothing to repair.
        match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                info!("Another snapshot is running, waiting for it to finish");
                self.lock.lock().unwrap_or_else(PoisonError::into_inner)
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        }
    }

    fn run(
        &self,
        guard: MutexGuard<'_, ()>,
        plan: &SnapshotPlan,
        name: &str,
    ) -> Result<SnapshotReport, SnapshotError> {
        let mut context = Context::for_snapshot(name);

        let report = self.run_locked(&mut context, plan, name);
        drop(guard);

        let report = report?;
        self.offload(&mut context, &report.path);

        Ok(report)
    }

    fn run_locked(
        &self,
        context: &mut Context,
        plan: &SnapshotPlan,
        name: &str,
    ) -> Result<SnapshotReport, SnapshotError> {
        let start = Instant::now();
        info!("{context}Starting snapshot of {:?}", plan.source_directory);
        self.notifier.notify("Snapshot started");

        let created = self.create(context, plan, name);

        let retention = retention::enforce(context, &plan.backup_directory, &plan.limits);
        for path in &retention.unreadable {
            self.notifier
                .notify(&format!("Kept snapshot {path:?}, its metadata could not be read"));
        }
        for path in &retention.failed {
            self.notifier
                .notify(&format!("Failed to delete snapshot {path:?}"));
        }

        let duration = start.elapsed();
        let seconds = duration.as_secs();
        context.current_context = "Finish";

        let created = match created {
            Ok(created) => created,
            Err(error) => {
                error!("{context}Snapshot failed after {seconds} seconds: {error}");
                self.notifier
                    .notify(&format!("Snapshot failed after {seconds} seconds: {error}"));
                return Err(error);
            }
        };

        info!(
            "{context}Snapshot finished after {seconds} seconds ({})",
            format_size(created.size)
        );
        self.notifier.notify(&format!(
            "Snapshot finished after {seconds} seconds ({})",
            format_size(created.size)
        ));

        Ok(SnapshotReport {
            path: created.path,
            timestamp: created.timestamp,
            size: created.size,
            archive: created.archive,
            retention,
            duration,
        })
    }

    /// Pause, archive, resume, promote.
    fn create(
        &self,
        context: &mut Context,
        plan: &SnapshotPlan,
        name: &str,
    ) -> Result<Created, SnapshotError> {
        context.current_context = "Prepare";

        fs::create_dir_all(&plan.backup_directory).map_err(SnapshotError::CreateBackupDirectory)?;

        let temporary = plan.backup_directory.join(TEMPORARY_NAME);
        let destination = plan.backup_directory.join(name);

        if destination.exists() {
            return Err(SnapshotError::NameTaken(destination));
        }

        context.current_context = "Pause";
        let archived = match self.hooks.pause() {
            Ok(()) => {
                context.current_context = "Archive";

                let timestamp = Utc::now().timestamp_millis();
                let archiver = Archiver::new(plan.exclusions.clone());

                archiver
                    .archive(&plan.source_directory, &temporary, timestamp)
                    .map(|summary| (timestamp, summary))
                    .map_err(SnapshotError::Archive)
            }
            Err(error) => Err(SnapshotError::Pause(error)),
        };

        // Writers are resumed whether or not the archive worked.
        context.current_context = "Resume";
        if let Err(error) = self.hooks.resume() {
            error!("{context}Could not resume writers: {error}");
            self.notifier
                .notify(&format!("Failed to resume writers: {error}"));
        }

        let (timestamp, archive) = match archived {
            Ok(archived) => archived,
            Err(error) => {
                remove_temporary(context, &temporary);
                return Err(error);
            }
        };

        info!(
            "{context}Archived {} files and {} directories ({})",
            archive.files,
            archive.directories,
            format_size(archive.bytes)
        );

        context.current_context = "Promote";
        // A complete archive that failed to promote stays as `tmp`.
        fs::rename(&temporary, &destination).map_err(SnapshotError::Promote)?;

        let size = total_size(&destination);
        info!("{context}Promoted to {destination:?}");

        Ok(Created {
            path: destination,
            timestamp,
            size,
            archive,
        })
    }

    /// Hand a finished snapshot to the offload, if there is one and the snapshot still exists.
    fn offload(&self, context: &mut Context, snapshot: &Path) {
        let Some(offload) = &self.offload else {
            return;
        };
        context.current_context = "Offload";

        if !snapshot.exists() {
            warn!("{context}Not offloading {snapshot:?}, it no longer exists");
            return;
        }

        if let Err(error) = offload.offload(snapshot) {
            error!("{context}Could not offload {snapshot:?}: {error}");
            self.notifier
                .notify(&format!("Snapshot offload failed: {error}"));
        }
    }
}

/// A promoted snapshot.
struct Created {
    path: PathBuf,
    timestamp: i64,
    size: u64,
    archive: ArchiveSummary,
}

/// Remove a partially written archive.
fn remove_temporary(context: &Context, temporary: &Path) {
    match fs::remove_file(temporary) {
        Ok(()) => info!("{context}Removed partial archive {temporary:?}"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!("{context}Could not remove partial archive {temporary:?}: {error}"),
    }
}

/// The name for a snapshot taken now, waiting for the next second while the name is taken.
fn name_for_now(backup_directory: &Path) -> String {
    let mut name = snapshot_file_name(Utc::now());

    for _ in 0..NAME_ATTEMPTS {
        if !backup_directory.join(&name).exists() {
            break;
        }

        let millis = u64::from(Utc::now().timestamp_subsec_millis());
        thread::sleep(Duration::from_millis(1000_u64.saturating_sub(millis)));
        name = snapshot_file_name(Utc::now());
    }

    name
}

/// The file name for a snapshot taken at `time`.
pub fn snapshot_file_name(time: DateTime<Utc>) -> String {
    format!("{}.{SNAPSHOT_EXTENSION}", time.format("%Y-%m-%d_%H-%M-%S"))
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to create backup directory: {0}")]
    CreateBackupDirectory(#[source] io::Error),

    #[error("A snapshot named {0:?} already exists")]
    NameTaken(PathBuf),

    #[error("Failed to pause writers: {0}")]
    Pause(#[source] HookError),

    #[error("Failed to archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Failed to promote the archive: {0}")]
    Promote(#[source] io::Error),
}
