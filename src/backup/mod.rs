pub(crate) mod credentials; // Connection string -> pg client parameters
pub(crate) mod db_dump;     // pg_dump invocation
pub(crate) mod executor;    // Dump/restore seam used by the manager
pub(crate) mod logic;       // BackupManager orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{BackupError, Result};

pub use logic::{BackupManager, RetentionWindow};

/// Bucket holding database dumps. Kept apart from the attachment bucket.
pub const BACKUP_BUCKET: &str = "letsee-backups";

/// Timestamp layout embedded in object keys and metadata.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const AUTO_MARKER: &str = "auto";
const KEY_SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Auto,
    Manual,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Auto => "auto",
            BackupType::Manual => "manual",
        }
    }

    /// Recovers the type from a key of the form `backup_{type}_...`.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let rest = filename.strip_prefix("backup_")?;
        let (kind, _) = rest.split_once(KEY_SEPARATOR)?;
        kind.parse().ok()
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(BackupType::Auto),
            "manual" => Ok(BackupType::Manual),
            other => Err(BackupError::UnknownBackupType(other.to_string())),
        }
    }
}

/// A backup as reconstructed from the bucket listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub backup_type: Option<BackupType>,
}

impl BackupRecord {
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
    }
}

/// `backup_{type}_{YYYYMMDD_HHMMSS}.sql`
pub fn backup_filename(backup_type: BackupType, at: DateTime<Utc>) -> String {
    format!("backup_{}_{}.sql", backup_type, at.format(TIMESTAMP_FORMAT))
}

/// Keys the retention policy is allowed to consider.
pub fn is_auto_backup_key(key: &str) -> bool {
    key.contains(AUTO_MARKER) && key.contains(KEY_SEPARATOR)
}

/// Rejects anything that could escape the bucket namespace when used as a key.
pub fn validate_backup_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty()
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(BackupError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}
