use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::credentials::DatabaseCredentials;
use super::executor::DatabaseExecutor;
use super::{BACKUP_BUCKET, BackupRecord, BackupType, TIMESTAMP_FORMAT, backup_filename, is_auto_backup_key};
use crate::errors::Result;
use crate::storage::{ObjectStore, ObjectSummary};

/// How many of the newest automatic backups survive a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    pub keep_daily: usize,
    pub keep_hourly: usize,
}

impl RetentionWindow {
    pub fn total(&self) -> usize {
        self.keep_daily.saturating_add(self.keep_hourly)
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        RetentionWindow {
            keep_daily: 7,
            keep_hourly: 24,
        }
    }
}

/// Creates, lists, restores and prunes database backups.
///
/// None of the public operations return errors: failures are logged and
/// reported as `None`, `false`, an empty list or a zero count, so a broken
/// backup never takes the hosting service down with it.
pub struct BackupManager {
    store: Arc<dyn ObjectStore>,
    executor: Arc<dyn DatabaseExecutor>,
    database_url: String,
    bucket: String,
}

impl BackupManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn DatabaseExecutor>,
        database_url: impl Into<String>,
    ) -> Self {
        BackupManager {
            store,
            executor,
            database_url: database_url.into(),
            bucket: BACKUP_BUCKET.to_string(),
        }
    }

    /// Makes sure the backup bucket exists. Failure is logged, not fatal.
    pub async fn ensure_bucket(&self) -> bool {
        match self.store.ensure_bucket(&self.bucket).await {
            Ok(()) => true,
            Err(e) => {
                error!(bucket = %self.bucket, error = %e, "Could not ensure backup bucket exists");
                false
            }
        }
    }

    /// Dumps the database and uploads it. Returns the object key on success.
    pub async fn create_backup(&self, backup_type: BackupType) -> Option<String> {
        match self.try_create_backup(backup_type).await {
            Ok(filename) => Some(filename),
            Err(e) => {
                error!(backup_type = %backup_type, error = %e, "Backup creation failed");
                None
            }
        }
    }

    async fn try_create_backup(&self, backup_type: BackupType) -> Result<String> {
        let creds = DatabaseCredentials::from_url(&self.database_url)?;
        let payload = self.executor.dump(&creds).await?;

        let now = Utc::now();
        let filename = backup_filename(backup_type, now);
        let size = payload.len();
        let metadata = HashMap::from([
            ("timestamp".to_string(), now.format(TIMESTAMP_FORMAT).to_string()),
            ("type".to_string(), backup_type.to_string()),
            ("size".to_string(), size.to_string()),
        ]);

        self.store
            .put_object(&self.bucket, &filename, payload, "text/plain", metadata)
            .await?;

        info!(
            filename = %filename,
            size_mb = %format!("{:.2}", size as f64 / 1024.0 / 1024.0),
            "Backup created successfully"
        );
        Ok(filename)
    }

    /// Downloads `filename` and replays it into the database.
    ///
    /// The filename is used as an object key as-is; callers validate it first.
    pub async fn restore_backup(&self, filename: &str) -> bool {
        match self.try_restore_backup(filename).await {
            Ok(()) => {
                info!(filename, "Backup restored successfully");
                true
            }
            Err(e) => {
                error!(filename, error = %e, "Restore failed");
                false
            }
        }
    }

    async fn try_restore_backup(&self, filename: &str) -> Result<()> {
        let creds = DatabaseCredentials::from_url(&self.database_url)?;
        let payload = self.store.get_object(&self.bucket, filename).await?;
        self.executor.restore(&creds, payload).await
    }

    /// Up to `limit` backups, newest first.
    pub async fn list_backups(&self, limit: usize) -> Vec<BackupRecord> {
        let max_keys = i32::try_from(limit).unwrap_or(i32::MAX);
        match self.store.list_objects(&self.bucket, Some(max_keys)).await {
            Ok(objects) => {
                let mut records: Vec<BackupRecord> = objects.into_iter().map(to_record).collect();
                records.sort_by(|a, b| {
                    b.created_at
                        .cmp(&a.created_at)
                        .then_with(|| b.filename.cmp(&a.filename))
                });
                records
            }
            Err(e) => {
                error!(error = %e, "Failed to list backups");
                Vec::new()
            }
        }
    }

    /// Deletes the oldest automatic backups beyond the retention window and
    /// returns how many were removed. Manual backups are never touched.
    pub async fn cleanup_old_backups(&self, retention: RetentionWindow) -> usize {
        match self.try_cleanup_old_backups(retention).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Cleanup failed");
                0
            }
        }
    }

    /// Like [`cleanup_old_backups`](Self::cleanup_old_backups), but a failed
    /// listing is returned instead of reading as "nothing deleted".
    pub async fn try_cleanup_old_backups(&self, retention: RetentionWindow) -> Result<usize> {
        let objects = self.store.list_objects(&self.bucket, None).await?;

        let mut auto_backups: Vec<ObjectSummary> = objects
            .into_iter()
            .filter(|o| is_auto_backup_key(&o.key))
            .collect();
        auto_backups.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });

        let excess = auto_backups.len().saturating_sub(retention.total());
        if excess == 0 {
            info!(
                auto_backups = auto_backups.len(),
                keep = retention.total(),
                "Nothing to clean up"
            );
            return Ok(0);
        }

        let mut deleted_count = 0;
        for backup in auto_backups.iter().take(excess) {
            match self.store.delete_object(&self.bucket, &backup.key).await {
                Ok(()) => {
                    info!(filename = %backup.key, "Deleted old backup");
                    deleted_count += 1;
                }
                Err(e) => warn!(filename = %backup.key, error = %e, "Failed to delete backup"),
            }
        }
        Ok(deleted_count)
    }
}

fn to_record(object: ObjectSummary) -> BackupRecord {
    BackupRecord {
        backup_type: BackupType::from_filename(&object.key),
        filename: object.key,
        size_bytes: object.size,
        created_at: object.last_modified,
    }
}
