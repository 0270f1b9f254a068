// letsee-backup/src/scheduler/mod.rs
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupManager, BackupType, RetentionWindow};
use crate::config::ScheduleConfig;

struct RunningLoops {
    token: CancellationToken,
    backup: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

/// Drives periodic backups and retention passes in the background.
///
/// Two states: stopped (`running` is `None`) and running (both loops spawned).
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    schedule: ScheduleConfig,
    running: Mutex<Option<RunningLoops>>,
}

impl BackupScheduler {
    pub fn new(manager: Arc<BackupManager>, schedule: ScheduleConfig) -> Self {
        BackupScheduler {
            manager,
            schedule,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawns the backup and cleanup loops. Returns `false` if they were already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Backup scheduler already running");
            return false;
        }

        info!(
            backup_initial_delay_s = self.schedule.backup_initial_delay.as_secs(),
            backup_interval_s = self.schedule.backup_interval.as_secs(),
            cleanup_initial_delay_s = self.schedule.cleanup_initial_delay.as_secs(),
            cleanup_interval_s = self.schedule.cleanup_interval.as_secs(),
            "Starting backup scheduler"
        );

        let token = CancellationToken::new();
        let backup = tokio::spawn(backup_loop(
            self.manager.clone(),
            token.clone(),
            self.schedule.backup_initial_delay,
            self.schedule.backup_interval,
        ));
        let cleanup = tokio::spawn(cleanup_loop(
            self.manager.clone(),
            token.clone(),
            self.schedule.cleanup_initial_delay,
            self.schedule.cleanup_interval,
            self.schedule.retention,
        ));

        *running = Some(RunningLoops { token, backup, cleanup });
        true
    }

    /// Signals both loops and waits for them to exit.
    ///
    /// An operation already in progress is allowed to finish. When a shutdown
    /// grace period is configured and runs out first, the loops are aborted and
    /// any pg_dump/psql child they own is killed.
    pub async fn stop(&self) {
        let Some(RunningLoops { token, mut backup, mut cleanup }) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping backup scheduler");
        token.cancel();

        let drained = async {
            let (backup_done, cleanup_done) = tokio::join!(&mut backup, &mut cleanup);
            for (name, done) in [("backup", backup_done), ("cleanup", cleanup_done)] {
                if let Err(e) = done {
                    error!(task = name, error = %e, "Scheduler loop ended abnormally");
                }
            }
        };
        match self.schedule.shutdown_grace {
            None => drained.await,
            Some(grace) => {
                if tokio::time::timeout(grace, drained).await.is_err() {
                    warn!(grace_s = grace.as_secs(), "In-flight backup work did not finish in time; aborting");
                    for handle in [backup, cleanup] {
                        if !handle.is_finished() {
                            handle.abort();
                            if let Err(e) = handle.await {
                                if !e.is_cancelled() {
                                    error!(error = %e, "Scheduler loop ended abnormally");
                                }
                            }
                        }
                    }
                }
            }
        }
        info!("Backup scheduler stopped");
    }
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on cancellation.
async fn wait_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Runs one iteration, turning a panic into a log line so the loop survives it.
async fn guarded<F: Future>(what: &str, fut: F) -> Option<F::Output> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(output) => Some(output),
        Err(_) => {
            error!(task = what, "Error in scheduler iteration");
            None
        }
    }
}

async fn backup_loop(
    manager: Arc<BackupManager>,
    token: CancellationToken,
    initial_delay: Duration,
    interval: Duration,
) {
    if !wait_or_cancelled(&token, initial_delay).await {
        return;
    }

    loop {
        let started = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        info!(at = %started, "Starting scheduled backup");

        match guarded("backup", manager.create_backup(BackupType::Auto)).await {
            Some(Some(filename)) => info!(filename = %filename, "Scheduled backup completed"),
            Some(None) => error!("Scheduled backup failed"),
            None => {}
        }

        if !wait_or_cancelled(&token, interval).await {
            break;
        }
    }
    debug!("Backup loop exited");
}

async fn cleanup_loop(
    manager: Arc<BackupManager>,
    token: CancellationToken,
    initial_delay: Duration,
    interval: Duration,
    retention: RetentionWindow,
) {
    if !wait_or_cancelled(&token, initial_delay).await {
        return;
    }

    loop {
        info!("Running backup cleanup");
        if let Some(deleted) = guarded("cleanup", manager.cleanup_old_backups(retention)).await {
            info!(deleted, "Cleanup completed");
        }

        if !wait_or_cancelled(&token, interval).await {
            break;
        }
    }
    debug!("Cleanup loop exited");
}

/// Foreground runner: back up immediately and every `run_loop_interval`,
/// pruning only after a backup succeeded. Returns when `shutdown` fires.
pub async fn run_backup_loop(
    manager: Arc<BackupManager>,
    schedule: ScheduleConfig,
    shutdown: CancellationToken,
) {
    loop {
        let filename = manager.create_backup(schedule.loop_backup_type).await;
        let deleted = match &filename {
            Some(_) => manager.cleanup_old_backups(schedule.retention).await,
            None => 0,
        };
        info!(
            backup = filename.as_deref().unwrap_or("failed"),
            deleted,
            next_run_after_s = schedule.run_loop_interval.as_secs(),
            "Backup run finished"
        );

        if !wait_or_cancelled(&shutdown, schedule.run_loop_interval).await {
            break;
        }
    }
}
