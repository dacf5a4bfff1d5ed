//! # backup-snapshot
//! Archives a live directory into timestamped zip snapshots and keeps the collection within
//! age, count, and size limits.
//!

pub mod archiver;
mod config;
mod context;
pub mod hooks;
pub mod notifier;
pub mod offload;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod size;

pub use config::{AutoSnapshotConfig, Config, LoadConfigError, RetentionConfig};
pub use context::Context;
pub use service::{BackupService, SnapshotError, SnapshotPlan, SnapshotReport};
