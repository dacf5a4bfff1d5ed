use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    archiver::Exclusions, hooks::CommandHooks, offload::DirectoryOffload,
    retention::RetentionLimits, service::SnapshotPlan,
};

const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

/// Written by the server while saving, archiving it produces broken snapshots.
const LEVEL_TEMPORARY_FILE: &str = "level.dat_new";

/// Retention limits as written in the config file. A negative value disables the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// The number of days a snapshot is kept for.
    pub max_age_days: i64,

    /// The maximum size of the backup directory in megabytes.
    pub max_size_megabytes: i64,

    /// The maximum number of snapshots kept in the backup directory.
    pub max_number_backups: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: -1,
            max_size_megabytes: -1,
            max_number_backups: -1,
        }
    }
}

impl RetentionConfig {
    /// The limits retention enforces.
    pub fn limits(&self) -> RetentionLimits {
        RetentionLimits {
            max_age_days: enabled(self.max_age_days),
            max_count: enabled(self.max_number_backups),
            max_total_bytes: enabled(self.max_size_megabytes)
                .map(|megabytes| megabytes.saturating_mul(BYTES_PER_MEGABYTE)),
        }
    }
}

fn enabled(limit: i64) -> Option<u64> {
    u64::try_from(limit).ok()
}

/// Automatic snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSnapshotConfig {
    /// If snapshots should be taken automatically.
    pub enabled: bool,

    /// Minutes between the starts of successful snapshots.
    pub interval_minutes: u64,
}

impl Default for AutoSnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 24 * 60,
        }
    }
}

/// The snapshot service's config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The directory to snapshot.
    pub source_directory: PathBuf,

    /// The directory snapshots are stored in.
    pub backup_directory: PathBuf,

    /// File names that are never archived. `level.dat_new` is always excluded.
    #[serde(default = "default_file_exclusions")]
    pub file_exclusions: Vec<String>,

    /// Directory names that are never archived.
    #[serde(default)]
    pub directory_exclusions: Vec<String>,

    /// Retention limits.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Automatic snapshots.
    #[serde(default)]
    pub auto_snapshot: AutoSnapshotConfig,

    /// Commands run before and after archiving.
    #[serde(default)]
    pub hooks: CommandHooks,

    /// Where finished snapshots are copied to.
    #[serde(default)]
    pub offload: Option<DirectoryOffload>,
}

impl Config {
    /// Tries to load a config from a toml file.
    pub fn load_toml(file_path: PathBuf) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile);
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;
        let config = toml::from_str(&contents)?;

        Ok(config)
    }

    /// The plan for the next snapshot run.
    pub fn plan(&self) -> SnapshotPlan {
        SnapshotPlan {
            source_directory: self.source_directory.clone(),
            backup_directory: self.backup_directory.clone(),
            exclusions: Exclusions::new(
                self.file_exclusions
                    .iter()
                    .map(String::as_str)
                    .chain([LEVEL_TEMPORARY_FILE]),
                self.directory_exclusions.iter().cloned(),
            ),
            limits: self.retention.limits(),
        }
    }
}

fn default_file_exclusions() -> Vec<String> {
    vec![LEVEL_TEMPORARY_FILE.to_string(), "session.lock".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_directory: PathBuf::from("world"),
            backup_directory: PathBuf::from("backup"),
            file_exclusions: default_file_exclusions(),
            directory_exclusions: Vec::new(),
            retention: RetentionConfig::default(),
            auto_snapshot: AutoSnapshotConfig::default(),
            hooks: CommandHooks::default(),
            offload: None,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file does not exist.")]
    NoFile,

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}
