//! Directory size probing.
//!

use std::{fs, path::Path};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// The total size in bytes of everything under `path`.
///
/// A missing path is zero and a file is its own length. Symbolic links are never descended into;
/// a link is counted only when its target is a file.
pub fn total_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry_size(&entry)),
            Err(error) => {
                warn!("Could not read entry while sizing {path:?}: {error}");
                None
            }
        })
        .fold(0, u64::saturating_add)
}

fn entry_size(entry: &DirEntry) -> u64 {
    let file_type = entry.file_type();

    let metadata = if file_type.is_file() {
        entry.metadata().map_err(|error| error.to_string())
    } else if file_type.is_symlink() {
        fs::metadata(entry.path()).map_err(|error| error.to_string())
    } else {
        return 0;
    };

    match metadata {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => 0,
        Err(error) => {
            warn!("Could not get entry {:?} metadata: {error}", entry.path());
            0
        }
    }
}

/// Formats a byte count for people, truncated to one decimal place, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    let (unit, suffix) = if bytes >= GB {
        (GB, "GB")
    } else if bytes >= MB {
        (MB, "MB")
    } else if bytes >= KB {
        (KB, "kB")
    } else {
        return format!("{bytes} B");
    };

    let tenths = u128::from(bytes) * 10 / u128::from(unit);
    format!("{}.{} {suffix}", tenths / 10, tenths % 10)
}
