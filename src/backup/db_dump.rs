// letsee-backup/src/backup/db_dump.rs
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backup::credentials::DatabaseCredentials;
use crate::errors::{BackupError, Result};

/// Environment variable the pg client programs read the password from.
pub(crate) const PASSWORD_ENV: &str = "PGPASSWORD";

/// Base invocation shared by pg_dump and psql. The password travels in the
/// child's environment only, never on the command line.
pub(crate) fn pg_client_command(program: &Path, creds: &DatabaseCredentials) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-h")
        .arg(&creds.host)
        .arg("-p")
        .arg(creds.port.to_string())
        .arg("-U")
        .arg(&creds.user)
        .arg("-d")
        .arg(&creds.database)
        .env(PASSWORD_ENV, &creds.password)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Runs a full logical dump and returns stdout as the backup payload.
///
/// Ownership and ACL statements are stripped so the dump restores into a
/// database owned by a different role.
pub async fn dump_database(pg_dump: &Path, creds: &DatabaseCredentials) -> Result<Vec<u8>> {
    info!(
        host = %creds.host,
        port = creds.port,
        database = %creds.database,
        "Running pg_dump"
    );

    let mut cmd = pg_client_command(pg_dump, creds);
    cmd.arg("--no-owner").arg("--no-acl").stdin(Stdio::null());

    // wait_with_output drains stdout and stderr together before reaping.
    let output = cmd.spawn()?.wait_with_output().await?;

    if !output.status.success() {
        return Err(BackupError::DumpFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    if !output.stderr.is_empty() {
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "pg_dump diagnostics");
    }
    info!(bytes = output.stdout.len(), database = %creds.database, "pg_dump finished");
    Ok(output.stdout)
}
