//! Quiescence hooks, run around the archive step so the source tree is not written to while it
//! is being read.
//!

use std::{io, process::Command};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Pauses and resumes the writers of a snapshot's source directory.
pub trait Quiescence: Send + Sync {
    /// Flush pending writes and stop further writes. A failure aborts the snapshot.
    fn pause(&self) -> Result<(), HookError>;

    /// Allow writes again. A failure is reported but does not stop retention.
    fn resume(&self) -> Result<(), HookError>;
}

/// For sources that are not written to while the service runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Quiescence for NoHooks {
    fn pause(&self) -> Result<(), HookError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Runs an external command for each hook, e.g. a script that tells a game server to save and
/// stop saving.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandHooks {
    /// The program and arguments run before archiving.
    pub pause_command: Option<Vec<String>>,

    /// The program and arguments run after archiving.
    pub resume_command: Option<Vec<String>>,
}

impl Quiescence for CommandHooks {
    fn pause(&self) -> Result<(), HookError> {
        run(self.pause_command.as_deref())
    }

    fn resume(&self) -> Result<(), HookError> {
        run(self.resume_command.as_deref())
    }
}

fn run(command: Option<&[String]>) -> Result<(), HookError> {
    let Some((program, arguments)) = command.and_then(<[String]>::split_first) else {
        return Ok(());
    };

    info!("Running hook {program} {arguments:?}");

    let output = Command::new(program)
        .args(arguments)
        .output()
        .map_err(HookError::RunCommand)?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(HookError::CommandErrored(output.status.to_string(), error));
    }

    Ok(())
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Failed to run command:\n{0}")]
    RunCommand(#[source] io::Error),

    #[error("Command exited with {0}:\n{1}")]
    CommandErrored(String, String),
}
