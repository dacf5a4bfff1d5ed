//! # common
//!

#![allow(dead_code)]

use core::time::Duration;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::sleep,
};

use backup_snapshot::{
    SnapshotPlan,
    archiver::Exclusions,
    hooks::{HookError, Quiescence},
    notifier::Notifier,
    offload::{Offload, OffloadError},
    retention::RetentionLimits,
};
use shared::{METADATA_ENTRY, SnapshotMetadata};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

pub const DAY_MILLISECONDS: i64 = 24 * 60 * 60 * 1000;

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// Write a snapshot with the given metadata timestamp and an uncompressed payload of
/// `payload_bytes` bytes.
pub fn write_snapshot(directory: &Path, name: &str, timestamp: i64, payload_bytes: usize) -> PathBuf {
    fs::create_dir_all(directory).unwrap();
    let path = directory.join(name);

    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file(METADATA_ENTRY, stored).unwrap();
    writer
        .write_all(&SnapshotMetadata::new(timestamp).to_json().unwrap())
        .unwrap();

    writer.start_file("payload", stored).unwrap();
    writer.write_all(&vec![7u8; payload_bytes]).unwrap();

    writer.finish().unwrap();
    path
}

/// The names of the files in `directory`, sorted.
pub fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// A plan with no exclusions and no retention limits.
pub fn plan(source_directory: &Path, backup_directory: &Path) -> SnapshotPlan {
    SnapshotPlan {
        source_directory: source_directory.to_path_buf(),
        backup_directory: backup_directory.to_path_buf(),
        exclusions: Exclusions::default(),
        limits: RetentionLimits::disabled(),
    }
}

/// A small world-like source tree.
pub fn populate_source(source: &Path) {
    write_file(source, "level.dat", b"level");
    write_file(source, "region/r.0.0.mca", &[1u8; 4096]);
    write_file(source, "playerdata/player.dat", b"player");
}

/// Keeps every message it is sent.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Hooks that count calls, can fail, can stall the pause, and can run a side effect on pause.
#[derive(Default)]
pub struct TestHooks {
    pub fail_pause: bool,
    pub fail_resume: bool,
    pub pause_delay: Duration,
    /// A directory created when paused.
    pub create_on_pause: Option<PathBuf>,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl TestHooks {
    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl Quiescence for TestHooks {
    fn pause(&self) -> Result<(), HookError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        sleep(self.pause_delay);

        if let Some(directory) = &self.create_on_pause {
            fs::create_dir_all(directory).unwrap();
        }

        if self.fail_pause {
            return Err(HookError::CommandErrored(
                "exit status: 1".to_string(),
                "save-off refused".to_string(),
            ));
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), HookError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);

        if self.fail_resume {
            return Err(HookError::CommandErrored(
                "exit status: 1".to_string(),
                "save-on refused".to_string(),
            ));
        }
        Ok(())
    }
}

/// Records offloaded snapshots, optionally failing every offload.
#[derive(Default)]
pub struct RecordingOffload {
    pub fail: bool,
    offloaded: Mutex<Vec<PathBuf>>,
}

impl RecordingOffload {
    pub fn failing() -> Self {
        Self {
            fail: true,
            offloaded: Mutex::default(),
        }
    }

    pub fn offloaded(&self) -> Vec<PathBuf> {
        self.offloaded.lock().unwrap().clone()
    }
}

impl Offload for RecordingOffload {
    fn offload(&self, snapshot: &Path) -> Result<(), OffloadError> {
        self.offloaded.lock().unwrap().push(snapshot.to_path_buf());

        if self.fail {
            return Err(OffloadError::NoFileName(snapshot.to_path_buf()));
        }
        Ok(())
    }
}
