//! # Backup snapshot
//! The service that snapshots a server's data directory.
//!

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use core::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread::sleep,
};

use backup_snapshot::{
    BackupService, Config,
    hooks::Quiescence,
    notifier::LogNotifier,
    offload::Offload,
    scheduler::{Scheduler, Tick},
};
use mimalloc::MiMalloc;
use shared::{Failure, init_logger};
use tracing::{error, info};

/// How often the scheduler checks if a snapshot is due.
const TICK: Duration = Duration::from_secs(20);

fn main() {
    let _logger = init_logger(Path::new("./logs")).or_log_and_panic("Could not create logger");

    // Initialize config if args include 'init'.
    if std::env::args().any(|arg| arg.eq("init")) {
        let config = Config::default();
        let contents =
            toml::to_string_pretty(&config).or_log_and_panic("Could not serialize config file");
        fs::write("config.toml", contents).or_log_and_panic("Could not create config file");
        return;
    }

    // Load config
    let config =
        Config::load_toml(PathBuf::from("./config.toml")).or_log_and_panic("Could not load config");

    let backup_directory = &config.backup_directory;
    if backup_directory.exists() && !backup_directory.is_dir() {
        error!("Backup directory {backup_directory:?} exists and is not a directory");
        return;
    }

    // Create service
    let service = {
        let hooks: Arc<dyn Quiescence> = Arc::new(config.hooks.clone());
        let offload = config
            .offload
            .clone()
            .map(|offload| Arc::new(offload) as Arc<dyn Offload>);

        Arc::new(BackupService::new(Arc::new(LogNotifier), hooks, offload))
    };

    // Run a single snapshot if args include 'now'.
    if std::env::args().any(|arg| arg.eq("now")) {
        let worker = service
            .spawn_snapshot(config.plan())
            .or_log_and_panic("Could not start snapshot worker");

        match worker.join() {
            Ok(Ok(report)) => info!("Snapshot written to {:?}", report.path),
            Ok(Err(error)) => error!("Snapshot failed: {error}"),
            Err(_) => error!("Snapshot worker panicked"),
        }
        return;
    }

    if !config.auto_snapshot.enabled {
        info!("Automatic snapshots are disabled, nothing to do");
        return;
    }

    info!(
        "Snapshotting {:?} into {backup_directory:?} every {} minutes",
        config.source_directory, config.auto_snapshot.interval_minutes
    );

    let plan = config.plan();
    let mut scheduler = Scheduler::new(config.auto_snapshot.interval_minutes);

    loop {
        if scheduler.tick(&service, &plan) == Tick::Started {
            info!("Automatic snapshot started");
        }

        sleep(TICK);
    }
}
