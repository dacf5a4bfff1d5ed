//! Transforms a directory tree into a single zip snapshot.
//!

use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use shared::{METADATA_ENTRY, SnapshotMetadata};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

/// The largest metadata record that will be read back from a snapshot.
const MAX_METADATA_BYTES: u64 = 64 * 1024;

/// File and directory names that are left out of snapshots.
///
/// Names are matched exactly against the final path component at every depth.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Exclusions {
    /// Excluded file names.
    pub file_names: HashSet<String>,

    /// Excluded directory names. An excluded directory is skipped with everything under it.
    pub directory_names: HashSet<String>,
}

impl Exclusions {
    /// Creates exclusions from lists of file and directory names.
    pub fn new<F, D>(file_names: F, directory_names: D) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            file_names: file_names.into_iter().map(Into::into).collect(),
            directory_names: directory_names.into_iter().map(Into::into).collect(),
        }
    }

    fn excludes(&self, entry: &DirEntry) -> bool {
        let Some(name) = entry.file_name().to_str() else {
            return false;
        };

        if entry.file_type().is_dir() {
            self.directory_names.contains(name)
        } else {
            self.file_names.contains(name)
        }
    }
}

/// What went into an archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of file entries written, not counting the metadata record.
    pub files: u64,

    /// Number of directory entries written.
    pub directories: u64,

    /// Uncompressed payload bytes.
    pub bytes: u64,
}

/// Writes directory trees into zip snapshots.
#[derive(Debug, Default, Clone)]
pub struct Archiver {
    exclusions: Exclusions,
}

impl Archiver {
    /// Creates an archiver honoring the given exclusions.
    pub fn new(exclusions: Exclusions) -> Self {
        Self { exclusions }
    }

    /// Archive `source` into `destination`, embedding `timestamp` as the snapshot's metadata.
    ///
    /// `destination` is created or truncated. On error it may be left partially written and must
    /// not be treated as a snapshot.
    pub fn archive(
        &self,
        source: &Path,
        destination: &Path,
        timestamp: i64,
    ) -> Result<ArchiveSummary, ArchiveError> {
        match fs::metadata(source) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(ArchiveError::SourceMissing(source.to_path_buf())),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(ArchiveError::SourceMissing(source.to_path_buf()));
            }
            Err(error) => return Err(ArchiveError::Io(error, "get source metadata")),
        }

        let file = File::create(destination).map_err(|e| ArchiveError::Io(e, "create archive"))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));

        // The record goes first and uncompressed so it can be read without touching the payload.
        {
            let record = SnapshotMetadata::new(timestamp)
                .to_json()
                .map_err(|e| ArchiveError::Io(io::Error::other(e), "serialize metadata"))?;

            writer
                .start_file(
                    METADATA_ENTRY,
                    SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
                )
                .map_err(|e| ArchiveError::Zip(e, "start metadata entry"))?;
            writer
                .write_all(&record)
                .map_err(|e| ArchiveError::Io(e, "write metadata entry"))?;
        }

        let mut summary = ArchiveSummary::default();

        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.exclusions.excludes(entry));

        for entry in walker {
            let entry = entry.map_err(|error| walk_error(source, error))?;
            let Some(name) = entry_name(source, entry.path()) else {
                warn!("Skipping {:?}, it is outside of {source:?}", entry.path());
                continue;
            };

            if entry.file_type().is_dir() {
                writer
                    .add_directory(name.as_str(), deflated())
                    .map_err(|e| ArchiveError::Zip(e, "add directory entry"))?;
                summary.directories += 1;
                continue;
            }

            if entry.depth() == 1 && name == METADATA_ENTRY {
                warn!("Skipping {:?}, the name is reserved for snapshot metadata", entry.path());
                continue;
            }

            // Follows a symbolic link one level so linked files are archived by content.
            let length = match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata.len(),
                Ok(_) => {
                    warn!("Skipping {:?}, it is not a regular file", entry.path());
                    continue;
                }
                Err(error) if entry.path_is_symlink() && error.kind() == ErrorKind::NotFound => {
                    warn!("Skipping dangling link {:?}", entry.path());
                    continue;
                }
                Err(error) => return Err(io_error(source, error, "get file metadata")),
            };

            let mut file =
                File::open(entry.path()).map_err(|e| io_error(source, e, "open source file"))?;

            writer
                .start_file(
                    name.as_str(),
                    deflated().large_file(length >= u64::from(u32::MAX)),
                )
                .map_err(|e| ArchiveError::Zip(e, "start file entry"))?;

            let bytes = io::copy(&mut file, &mut writer)
                .map_err(|e| io_error(source, e, "write file entry"))?;

            debug!("Archived {name} ({bytes} bytes)");
            summary.files += 1;
            summary.bytes = summary.bytes.saturating_add(bytes);
        }

        let buffer = writer
            .finish()
            .map_err(|e| ArchiveError::Zip(e, "finish archive"))?;
        let file = buffer
            .into_inner()
            .map_err(|e| ArchiveError::Io(e.into_error(), "flush archive"))?;
        file.sync_all()
            .map_err(|e| ArchiveError::Io(e, "sync archive"))?;

        Ok(summary)
    }
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// The zip entry name for `path`, relative to `source` and joined with `/`.
fn entry_name(source: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source).ok()?;

    let name = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Some(name)
}

fn walk_error(source: &Path, error: walkdir::Error) -> ArchiveError {
    io_error(source, io::Error::from(error), "walk source")
}

/// Maps an IO error, reporting a vanished source as [`ArchiveError::SourceMissing`].
fn io_error(source: &Path, error: io::Error, action: &'static str) -> ArchiveError {
    if error.kind() == ErrorKind::NotFound && !source.is_dir() {
        ArchiveError::SourceMissing(source.to_path_buf())
    } else {
        ArchiveError::Io(error, action)
    }
}

/// Read the embedded metadata record of a snapshot.
pub fn read_metadata(path: &Path) -> Result<SnapshotMetadata, MetadataError> {
    let file = File::open(path).map_err(MetadataError::Open)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(MetadataError::Archive)?;

    let entry = match archive.by_name(METADATA_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(MetadataError::MissingRecord),
        Err(error) => return Err(MetadataError::Archive(error)),
    };

    let mut bytes = Vec::new();
    entry
        .take(MAX_METADATA_BYTES)
        .read_to_end(&mut bytes)
        .map_err(MetadataError::Read)?;

    Ok(SnapshotMetadata::from_json(&bytes)?)
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Source directory {0:?} is missing or is not a directory")]
    SourceMissing(PathBuf),

    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Failed to {1}: {0}")]
    Zip(#[source] ZipError, &'static str),
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to open file: {0}")]
    Open(#[source] io::Error),

    #[error("Failed to read as a zip archive: {0}")]
    Archive(#[source] ZipError),

    #[error("Archive has no backupdata.json entry")]
    MissingRecord,

    #[error("Failed to read backupdata.json: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to parse backupdata.json: {0}")]
    Parse(#[from] serde_json::Error),
}
