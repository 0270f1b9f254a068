// letsee-backup/src/restore/db_restore.rs
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::backup::credentials::DatabaseCredentials;
use crate::backup::db_dump::pg_client_command;
use crate::errors::{BackupError, Result};

/// Replays a dump against the live database by piping it into psql.
///
/// Not transactional: if psql fails halfway the database is left as psql left
/// it and the failure is returned to the caller.
pub async fn restore_database(
    psql: &Path,
    creds: &DatabaseCredentials,
    payload: Vec<u8>,
) -> Result<()> {
    info!(
        host = %creds.host,
        port = creds.port,
        database = %creds.database,
        bytes = payload.len(),
        "Executing restore with psql"
    );

    let mut cmd = pg_client_command(psql, creds);
    cmd.stdin(Stdio::piped());
    let mut child = cmd.spawn()?;

    let mut stdin = child.stdin.take().ok_or_else(|| {
        BackupError::Io(std::io::Error::other("psql stdin was not captured"))
    })?;

    // Feed stdin while stdout/stderr are drained, otherwise a chatty psql
    // fills its pipes and both sides block.
    let feed = async move {
        let written = stdin.write_all(&payload).await;
        let closed = stdin.shutdown().await;
        drop(stdin);
        written.and(closed)
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;

    if !output.status.success() {
        return Err(BackupError::RestoreFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    if let Err(e) = fed {
        // psql exited cleanly without reading everything; treat as failure.
        warn!(error = %e, "psql did not consume the full dump");
        return Err(BackupError::Io(e));
    }

    info!(database = %creds.database, "psql restore finished");
    Ok(())
}
