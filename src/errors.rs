use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid database connection string: {0}")]
    CredentialParse(#[from] url::ParseError),

    #[error("Client program '{program}' not found: {source}")]
    ToolNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dump failed with {status}: {stderr}")]
    DumpFailed { status: ExitStatus, stderr: String },

    #[error("Restore failed with {status}: {stderr}")]
    RestoreFailed { status: ExitStatus, stderr: String },

    #[error("Failed to upload object '{key}': {message}")]
    UploadFailed { key: String, message: String },

    #[error("Failed to download object '{key}': {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Failed to delete object '{key}': {message}")]
    DeleteFailed { key: String, message: String },

    #[error("Failed to list bucket '{bucket}': {message}")]
    ListFailed { bucket: String, message: String },

    #[error("Failed to ensure bucket '{bucket}': {message}")]
    BucketEnsureFailed { bucket: String, message: String },

    #[error("Invalid backup filename: {0}")]
    InvalidFilename(String),

    #[error("Unknown backup type: {0}")]
    UnknownBackupType(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
