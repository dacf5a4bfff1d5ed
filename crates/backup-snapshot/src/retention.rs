//! Snapshot retention.
//!
//! A retention pass scans the backup directory, orders every readable snapshot by its embedded
//! timestamp, then applies the age, count, and size limits in that order. Each limit sees the
//! snapshots that survived the previous one and deletes oldest first.
//!

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{Context, archiver::read_metadata, size::total_size};

/// The file extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "zip";

const MILLISECONDS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// A snapshot file and its embedded creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Path to the snapshot file.
    pub path: PathBuf,

    /// The snapshot's file name.
    pub name: String,

    /// Milliseconds since the Unix epoch, read from the snapshot's metadata record.
    pub timestamp: i64,
}

impl Snapshot {
    /// The current size of the snapshot file in bytes, zero if it can't be read.
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path)
            .map(|metadata| metadata.len())
            .unwrap_or(0)
    }
}

/// Limits a retention pass enforces. `None` disables a limit, `Some(0)` is a real limit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimits {
    /// Snapshots older than this many whole days are deleted.
    pub max_age_days: Option<u64>,

    /// At most this many snapshots are kept.
    pub max_count: Option<u64>,

    /// Snapshots are deleted until the whole backup directory is at most this many bytes.
    pub max_total_bytes: Option<u64>,
}

impl RetentionLimits {
    /// Limits that never delete anything.
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// The result of a retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Names of the snapshots deleted, in deletion order.
    pub deleted: Vec<String>,

    /// Snapshot-named files whose metadata could not be read. These are never deleted.
    pub unreadable: Vec<PathBuf>,

    /// Snapshots that should have been deleted but could not be.
    pub failed: Vec<PathBuf>,
}

/// Enforce `limits` on the snapshots in `backup_directory` using the current time.
pub fn enforce(
    context: &mut Context,
    backup_directory: &Path,
    limits: &RetentionLimits,
) -> RetentionReport {
    enforce_at(
        context,
        backup_directory,
        limits,
        Utc::now().timestamp_millis(),
    )
}

/// Enforce `limits` on the snapshots in `backup_directory` as if the time were `now`
/// (milliseconds since the Unix epoch).
pub fn enforce_at(
    context: &mut Context,
    backup_directory: &Path,
    limits: &RetentionLimits,
    now: i64,
) -> RetentionReport {
    let (snapshots, unreadable) = scan(context, backup_directory);

    let mut report = apply(context, backup_directory, snapshots, limits, now);
    report.unreadable = unreadable;

    report
}

/// Apply `limits` to `snapshots`, which must be ordered oldest first.
///
/// The size limit is measured over the whole of `backup_directory`. A snapshot that can't be
/// deleted is reported in [`RetentionReport::failed`] and no longer counts towards the count
/// limit.
pub fn apply(
    context: &mut Context,
    backup_directory: &Path,
    mut snapshots: Vec<Snapshot>,
    limits: &RetentionLimits,
    now: i64,
) -> RetentionReport {
    let mut report = RetentionReport::default();

    context.current_context = "Retention";

    // Age
    if let Some(max_age_days) = limits.max_age_days {
        let mut kept = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let age_days = now.saturating_sub(snapshot.timestamp).max(0) / MILLISECONDS_PER_DAY;
            debug!("{context}{} is {age_days} days old", snapshot.name);

            if u64::try_from(age_days).unwrap_or(0) > max_age_days {
                info!(
                    "{context}Age: removing {}, {age_days} days > {max_age_days}",
                    snapshot.name
                );
                delete(context, &snapshot, &mut report);
            } else {
                kept.push(snapshot);
            }
        }

        snapshots = kept;
    }

    // Count
    if let Some(max_count) = limits.max_count {
        let max_count = usize::try_from(max_count).unwrap_or(usize::MAX);

        if snapshots.len() > max_count {
            let excess = snapshots.len() - max_count;

            for snapshot in snapshots.drain(..excess) {
                info!(
                    "{context}Count: removing {}, more than {max_count} snapshots",
                    snapshot.name
                );
                delete(context, &snapshot, &mut report);
            }
        }
    }

    // Size
    if let Some(max_total_bytes) = limits.max_total_bytes {
        let mut remaining = snapshots.into_iter();

        loop {
            let directory_bytes = total_size(backup_directory);
            if directory_bytes <= max_total_bytes {
                break;
            }

            let Some(snapshot) = remaining.next() else {
                warn!(
                    "{context}Size: backup directory is {directory_bytes} bytes > \
                     {max_total_bytes} with no snapshots left to remove"
                );
                break;
            };

            info!(
                "{context}Size: removing {}, backup directory is {directory_bytes} bytes > \
                 {max_total_bytes}",
                snapshot.name
            );
            delete(context, &snapshot, &mut report);
        }
    }

    report
}

/// Delete a snapshot, recording the outcome. A failure is logged and the pass carries on.
fn delete(context: &Context, snapshot: &Snapshot, report: &mut RetentionReport) {
    match fs::remove_file(&snapshot.path) {
        Ok(()) => report.deleted.push(snapshot.name.clone()),
        Err(error) => {
            error!("{context}Could not remove {:?}: {error}", snapshot.path);
            report.failed.push(snapshot.path.clone());
        }
    }
}

/// Find the snapshots in `backup_directory`, oldest first.
///
/// Also returns the snapshot-named files whose metadata could not be read.
pub fn scan(context: &mut Context, backup_directory: &Path) -> (Vec<Snapshot>, Vec<PathBuf>) {
    context.current_context = "Scan";

    let directory = match fs::read_dir(backup_directory) {
        Ok(directory) => directory,
        Err(error) => {
            if error.kind() == ErrorKind::NotFound {
                warn!("{context}Backup directory not found: {backup_directory:?}");
            } else {
                error!("{context}Could not read backup directory {backup_directory:?}: {error}");
            }
            return (Vec::new(), Vec::new());
        }
    };

    let mut snapshots = Vec::new();
    let mut unreadable = Vec::new();

    for entry in directory {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("{context}Could not read entry: {error}");
                continue;
            }
        };
        let path = entry.path();

        let is_snapshot_name = path
            .extension()
            .is_some_and(|extension| extension == SNAPSHOT_EXTENSION);
        if !is_snapshot_name {
            continue;
        }

        match entry.file_type() {
            Ok(file_type) if file_type.is_file() => {}
            Ok(_) => continue,
            Err(error) => {
                warn!("{context}Could not get entry {path:?} file type: {error}");
                continue;
            }
        }

        match read_metadata(&path) {
            Ok(metadata) => snapshots.push(Snapshot {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                timestamp: metadata.timestamp,
            }),
            Err(error) => {
                warn!("{context}Ignoring {path:?}, could not read snapshot metadata: {error}");
                unreadable.push(path);
            }
        }
    }

    // Oldest first, name breaks ties.
    snapshots.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.name.cmp(&b.name))
    });

    (snapshots, unreadable)
}
