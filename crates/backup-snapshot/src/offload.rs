//! Copying finished snapshots somewhere else.
//!

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::size::format_size;

/// Receives each finished snapshot after retention. Failures never affect local snapshots.
pub trait Offload: Send + Sync {
    /// Offload the snapshot at `snapshot`.
    fn offload(&self, snapshot: &Path) -> Result<(), OffloadError>;
}

/// Copies snapshots into another directory, such as a mounted network share.
///
/// The copy is written under a `.partial` name and renamed once complete, so the destination
/// never holds a truncated snapshot under its final name. A failed copy removes the `.partial` file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryOffload {
    /// The directory to copy snapshots into.
    pub directory: PathBuf,
}

impl Offload for DirectoryOffload {
    fn offload(&self, snapshot: &Path) -> Result<(), OffloadError> {
        let Some(file_name) = snapshot.file_name() else {
            return Err(OffloadError::NoFileName(snapshot.to_path_buf()));
        };

        fs::create_dir_all(&self.directory)
            .map_err(|e| OffloadError::Io(e, "create offload directory"))?;

        let destination = self.directory.join(file_name);
        let partial = destination.with_extension("partial");

        let copied = fs::copy(snapshot, &partial)
            .map_err(|e| OffloadError::Io(e, "copy snapshot"))
            .and_then(|bytes| {
                fs::rename(&partial, &destination)
                    .map(|()| bytes)
                    .map_err(|e| OffloadError::Io(e, "rename offloaded snapshot"))
            });

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(error) => {
                match fs::remove_file(&partial) {
                    Ok(()) => {}
                    Err(remove_error) if remove_error.kind() == ErrorKind::NotFound => {}
                    Err(remove_error) => {
                        warn!("Could not remove partial offload {partial:?}: {remove_error}")
                    }
                }
                return Err(error);
            }
        };

        info!("Offloaded {} to {destination:?}", format_size(bytes));

        Ok(())
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("Snapshot path {0:?} has no file name")]
    NoFileName(PathBuf),

    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),
}
