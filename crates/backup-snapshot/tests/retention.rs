//! Tests for retention
//!

use std::{
    fs,
    path::{Path, PathBuf},
};

use backup_snapshot::{
    Context,
    retention::{RetentionLimits, RetentionReport, Snapshot, apply, enforce, enforce_at, scan},
};
use common::{DAY_MILLISECONDS, file_names, write_file, write_snapshot};
use shared::test::init_test_logger;
use tempfile::TempDir;

mod common;

const NOW: i64 = 1_700_000_000_000;
const KB: usize = 1024;

#[test]
fn max_age() {
    let _logger = init_test_logger();
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    for days in [1, 5, 10, 40] {
        write_snapshot(backups, &format!("{days}.zip"), NOW - days * DAY_MILLISECONDS, 16);
    }

    let limits = RetentionLimits {
        max_age_days: Some(30),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["40.zip".to_string()]);
    assert_eq!(file_names(backups), vec!["1.zip", "10.zip", "5.zip"]);
}

#[test]
fn max_age_uses_whole_days() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    // 30 days and 23 hours old is 30 whole days, which is not more than 30.
    write_snapshot(backups, "kept.zip", NOW - 31 * DAY_MILLISECONDS + 3_600_000, 16);
    write_snapshot(backups, "removed.zip", NOW - 31 * DAY_MILLISECONDS, 16);

    let limits = RetentionLimits {
        max_age_days: Some(30),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["removed.zip".to_string()]);
}

#[test]
fn future_timestamp_is_not_old() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_snapshot(backups, "future.zip", NOW + 10 * DAY_MILLISECONDS, 16);

    let limits = RetentionLimits {
        max_age_days: Some(0),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert!(report.deleted.is_empty());
}

#[test]
fn max_count() {
    let _logger = init_test_logger();
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    // Names are in reverse timestamp order so only the embedded timestamp decides.
    for (index, name) in ["e", "d", "c", "b", "a"].iter().enumerate() {
        let timestamp = NOW - i64::try_from(index).unwrap() * DAY_MILLISECONDS;
        write_snapshot(backups, &format!("{name}.zip"), timestamp, 16);
    }

    let limits = RetentionLimits {
        max_count: Some(3),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["a.zip".to_string(), "b.zip".to_string()]);
    assert_eq!(file_names(backups), vec!["c.zip", "d.zip", "e.zip"]);
}

#[test]
fn max_count_zero_removes_every_snapshot() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_snapshot(backups, "a.zip", NOW, 16);
    write_snapshot(backups, "b.zip", NOW, 16);

    let limits = RetentionLimits {
        max_count: Some(0),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted.len(), 2);
    assert!(file_names(backups).is_empty());
}

#[test]
fn equal_timestamps_ordered_by_name() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_snapshot(backups, "b.zip", NOW, 16);
    write_snapshot(backups, "a.zip", NOW, 16);

    let limits = RetentionLimits {
        max_count: Some(1),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["a.zip".to_string()]);
}

#[test]
fn max_total_bytes() {
    let _logger = init_test_logger();
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    write_snapshot(backups, "a.zip", NOW - 3 * DAY_MILLISECONDS, 10 * KB);
    write_snapshot(backups, "b.zip", NOW - 2 * DAY_MILLISECONDS, 20 * KB);
    write_snapshot(backups, "c.zip", NOW - DAY_MILLISECONDS, 5 * KB);

    let limits = RetentionLimits {
        max_total_bytes: Some(20 * 1024),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["a.zip".to_string(), "b.zip".to_string()]);
    assert_eq!(file_names(backups), vec!["c.zip"]);
}

#[test]
fn max_total_bytes_counts_other_files() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    write_snapshot(backups, "a.zip", NOW - DAY_MILLISECONDS, KB);
    write_snapshot(backups, "b.zip", NOW, KB);
    write_file(backups, "notes.txt", &vec![0u8; 30 * KB]);

    let limits = RetentionLimits {
        max_total_bytes: Some(20 * 1024),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    // Every snapshot goes, the other file is never touched.
    assert_eq!(report.deleted, vec!["a.zip".to_string(), "b.zip".to_string()]);
    assert_eq!(file_names(backups), vec!["notes.txt"]);
}

#[test]
fn policies_apply_in_order() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();

    write_snapshot(backups, "old.zip", NOW - 50 * DAY_MILLISECONDS, 16);
    for day in 0..4 {
        write_snapshot(backups, &format!("day{day}.zip"), NOW - (4 - day) * DAY_MILLISECONDS, 16);
    }

    let limits = RetentionLimits {
        max_age_days: Some(30),
        max_count: Some(3),
        max_total_bytes: None,
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["old.zip".to_string(), "day0.zip".to_string()]);
}

#[test]
fn disabled_limits_delete_nothing() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_snapshot(backups, "ancient.zip", 0, 16);
    write_snapshot(backups, "a.zip", NOW, 16);

    let report = enforce(&mut Context::default(), backups, &RetentionLimits::disabled());

    assert!(report.deleted.is_empty());
    assert_eq!(file_names(backups).len(), 2);
}

#[test]
fn idempotent() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    for day in 0..5 {
        write_snapshot(backups, &format!("{day}.zip"), NOW - day * DAY_MILLISECONDS, 16);
    }

    let limits = RetentionLimits {
        max_age_days: Some(2),
        max_count: Some(2),
        max_total_bytes: Some(1024 * 1024),
    };

    let first = enforce_at(&mut Context::default(), backups, &limits, NOW);
    let remaining = file_names(backups);
    let second = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(first.deleted.len(), 3);
    assert!(second.deleted.is_empty());
    assert_eq!(file_names(backups), remaining);
}

#[test]
fn unreadable_snapshots_are_kept() {
    let _logger = init_test_logger();
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    let broken = write_file(backups, "broken.zip", b"not a zip");
    write_snapshot(backups, "a.zip", NOW, 16);

    let limits = RetentionLimits {
        max_count: Some(0),
        ..Default::default()
    };
    let report = enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(report.deleted, vec!["a.zip".to_string()]);
    assert_eq!(report.unreadable, vec![broken.clone()]);
    assert!(broken.exists());
}

#[test]
fn other_files_are_ignored() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_file(backups, "tmp", b"partial");
    write_file(backups, "notes.txt", b"notes");
    fs::create_dir_all(backups.join("folder.zip")).unwrap();
    write_snapshot(backups, "a.zip", NOW, 16);

    let (snapshots, unreadable) = scan(&mut Context::default(), backups);

    assert_eq!(snapshots.len(), 1);
    assert!(unreadable.is_empty());

    let limits = RetentionLimits {
        max_count: Some(0),
        ..Default::default()
    };
    enforce_at(&mut Context::default(), backups, &limits, NOW);

    assert_eq!(file_names(backups), vec!["folder.zip", "notes.txt", "tmp"]);
}

#[test]
fn scan_orders_oldest_first() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path();
    write_snapshot(backups, "newest.zip", NOW, 16);
    write_snapshot(backups, "oldest.zip", NOW - 2 * DAY_MILLISECONDS, 16);
    write_snapshot(backups, "middle.zip", NOW - DAY_MILLISECONDS, 16);

    let (snapshots, _) = scan(&mut Context::default(), backups);
    let names: Vec<&str> = snapshots.iter().map(|snapshot| snapshot.name.as_str()).collect();

    assert_eq!(names, vec!["oldest.zip", "middle.zip", "newest.zip"]);
    assert_eq!(snapshots[0].timestamp, NOW - 2 * DAY_MILLISECONDS);
    assert!(snapshots[0].size() > 16);
}

#[test]
fn missing_backup_directory() {
    let directory = TempDir::new().unwrap();

    let report = enforce(
        &mut Context::default(),
        &directory.path().join("missing"),
        &RetentionLimits {
            max_count: Some(0),
            ..Default::default()
        },
    );

    assert_eq!(report, RetentionReport::default());
}

/// Snapshots from a read-only directory followed by snapshots from `backups`, oldest first.
///
/// Returns `None` when the read-only directory is writable anyway, e.g. when running as root.
#[cfg(unix)]
fn with_stuck_snapshot(root: &Path, backups: &Path) -> Option<(PathBuf, Vec<Snapshot>)> {
    use std::os::unix::fs::PermissionsExt;

    let locked = root.join("locked");
    let stuck = write_snapshot(&locked, "stuck.zip", NOW - 3 * DAY_MILLISECONDS, 16);
    write_snapshot(backups, "a.zip", NOW - 2 * DAY_MILLISECONDS, 16);
    write_snapshot(backups, "b.zip", NOW - DAY_MILLISECONDS, 16);
    write_snapshot(backups, "c.zip", NOW, 16);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    if fs::write(locked.join("writable"), b"").is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return None;
    }

    let (mut snapshots, _) = scan(&mut Context::default(), &locked);
    let (rest, _) = scan(&mut Context::default(), backups);
    snapshots.extend(rest);

    Some((stuck, snapshots))
}

#[cfg(unix)]
fn unlock(root: &Path) {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[test]
fn failed_deletion_continues_with_count() {
    let _logger = init_test_logger();
    let directory = TempDir::new().unwrap();
    let backups = directory.path().join("backup");
    let Some((stuck, snapshots)) = with_stuck_snapshot(directory.path(), &backups) else {
        return;
    };

    let limits = RetentionLimits {
        max_count: Some(1),
        ..Default::default()
    };
    let report = apply(&mut Context::default(), &backups, snapshots, &limits, NOW);
    unlock(directory.path());

    assert_eq!(report.failed, vec![stuck.clone()]);
    assert_eq!(report.deleted, vec!["a.zip".to_string(), "b.zip".to_string()]);
    assert!(stuck.exists());
    assert_eq!(file_names(&backups), vec!["c.zip"]);
}

#[cfg(unix)]
#[test]
fn failed_deletion_continues_with_size() {
    let directory = TempDir::new().unwrap();
    let backups = directory.path().join("backup");
    let Some((stuck, snapshots)) = with_stuck_snapshot(directory.path(), &backups) else {
        return;
    };

    let limits = RetentionLimits {
        max_total_bytes: Some(0),
        ..Default::default()
    };
    let report = apply(&mut Context::default(), &backups, snapshots, &limits, NOW);
    unlock(directory.path());

    assert_eq!(report.failed, vec![stuck]);
    assert_eq!(report.deleted.len(), 3);
    assert!(file_names(&backups).is_empty());
}
