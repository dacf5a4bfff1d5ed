//! # Shared
//! The shared components between the snapshot service, its binary, and the tests.
//!

#![warn(missing_docs)]

mod failure;
mod logger;
mod metadata;

pub use failure::{Failure, log_and_panic};
pub use logger::{LoggerError, init_logger};
pub use metadata::{METADATA_ENTRY, SnapshotMetadata};
