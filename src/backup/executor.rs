use async_trait::async_trait;

use crate::backup::credentials::DatabaseCredentials;
use crate::backup::db_dump::dump_database;
use crate::errors::Result;
use crate::restore::db_restore::restore_database;
use crate::utils::find_executable;

/// Produces and replays logical dumps of the application database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    async fn dump(&self, credentials: &DatabaseCredentials) -> Result<Vec<u8>>;
    async fn restore(&self, credentials: &DatabaseCredentials, payload: Vec<u8>) -> Result<()>;
}

/// Executor backed by the PostgreSQL client programs.
#[derive(Debug, Clone)]
pub struct PgClientTools {
    dump_program: String,
    restore_program: String,
}

impl PgClientTools {
    pub fn new(dump_program: impl Into<String>, restore_program: impl Into<String>) -> Self {
        PgClientTools {
            dump_program: dump_program.into(),
            restore_program: restore_program.into(),
        }
    }
}

#[async_trait]
impl DatabaseExecutor for PgClientTools {
    async fn dump(&self, credentials: &DatabaseCredentials) -> Result<Vec<u8>> {
        let pg_dump = find_executable(&self.dump_program)?;
        dump_database(&pg_dump, credentials).await
    }

    async fn restore(&self, credentials: &DatabaseCredentials, payload: Vec<u8>) -> Result<()> {
        let psql = find_executable(&self.restore_program)?;
        restore_database(&psql, credentials, payload).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::errors::BackupError;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn creds() -> DatabaseCredentials {
        DatabaseCredentials {
            host: "db.internal".into(),
            port: 6543,
            database: "letsee".into(),
            user: "letsee".into(),
            password: "hunter2".into(),
        }
    }

    // All subprocess cases share one test so no other test forks while a
    // script file is still open for writing.
    #[tokio::test]
    async fn test_pg_client_tools_with_fake_programs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("restored.sql");

        let dump_ok = write_script(
            dir.path(),
            "fake_pg_dump",
            r#"echo "warning: noise" >&2
printf 'ARGS %s\n' "$*"
printf 'PW %s\n' "$PGPASSWORD""#,
        );
        let dump_bad = write_script(
            dir.path(),
            "failing_pg_dump",
            r#"echo "connection refused" >&2
exit 3"#,
        );
        let restore_ok = write_script(
            dir.path(),
            "fake_psql",
            &format!(r#"cat > "{}"
echo "restore chatter" >&2"#, sink.display()),
        );
        let restore_bad = write_script(
            dir.path(),
            "failing_psql",
            r#"cat > /dev/null
echo "ERROR: relation exists" >&2
exit 1"#,
        );

        let to_str = |p: &PathBuf| p.to_string_lossy().to_string();

        // Dump: flags and password handling.
        let tools = PgClientTools::new(to_str(&dump_ok), to_str(&restore_ok));
        let payload = tools.dump(&creds()).await.unwrap();
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("ARGS -h db.internal -p 6543 -U letsee -d letsee --no-owner --no-acl"));
        assert!(!text.lines().next().unwrap().contains("hunter2"));
        assert!(text.contains("PW hunter2"));

        // Restore: a payload well above the pipe buffer size reaches psql intact.
        let big: Vec<u8> = (0..2_000_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        tools.restore(&creds(), big.clone()).await.unwrap();
        assert_eq!(fs::read(&sink).unwrap(), big);

        // Non-zero exits carry stderr.
        let failing = PgClientTools::new(to_str(&dump_bad), to_str(&restore_bad));
        match failing.dump(&creds()).await {
            Err(BackupError::DumpFailed { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "connection refused");
            }
            other => panic!("expected DumpFailed, got {other:?}"),
        }
        match failing.restore(&creds(), b"SELECT 1;".to_vec()).await {
            Err(BackupError::RestoreFailed { stderr, .. }) => {
                assert!(stderr.contains("relation exists"))
            }
            other => panic!("expected RestoreFailed, got {other:?}"),
        }

        // Missing programs surface as ToolNotFound before anything runs.
        let missing = PgClientTools::new("no-such-pg_dump", "no-such-psql");
        assert!(matches!(
            missing.dump(&creds()).await,
            Err(BackupError::ToolNotFound { .. })
        ));
    }
}
