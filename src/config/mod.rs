// letsee-backup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::backup::{BackupType, RetentionWindow};

// Structs for deserializing config.json. Every field is optional; anything
// missing falls back to the environment and then to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonScheduleConfig {
    pub backup_initial_delay_seconds: Option<u64>,
    pub backup_interval_seconds: Option<u64>,
    pub run_loop_interval_seconds: Option<u64>,
    pub cleanup_initial_delay_seconds: Option<u64>,
    pub cleanup_interval_seconds: Option<u64>,
    pub keep_daily: Option<usize>,
    pub keep_hourly: Option<usize>,
    pub shutdown_grace_seconds: Option<u64>,
    pub backup_type: Option<BackupType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub dump_program: Option<String>,
    pub restore_program: Option<String>,
    pub bind_addr: Option<String>,
    pub api_token: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub schedule: Option<JsonScheduleConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub backup_initial_delay: Duration,
    pub backup_interval: Duration,
    /// Pause between `run-loop` iterations. Separate from the in-process
    /// scheduler so tuning the standalone runner never changes `serve`.
    pub run_loop_interval: Duration,
    pub cleanup_initial_delay: Duration,
    pub cleanup_interval: Duration,
    pub retention: RetentionWindow,
    /// `None` waits for in-flight work on shutdown; `Some` aborts it after the grace period.
    pub shutdown_grace: Option<Duration>,
    /// Type tagged on backups made by `run-loop`.
    pub loop_backup_type: BackupType,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            backup_initial_delay: Duration::from_secs(300),
            backup_interval: Duration::from_secs(3600),
            run_loop_interval: Duration::from_secs(86400),
            cleanup_initial_delay: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(86400),
            retention: RetentionWindow::default(),
            shutdown_grace: None,
            loop_backup_type: BackupType::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage: StorageConfig,
    pub dump_program: String,
    pub restore_program: String,
    pub bind_addr: String,
    pub api_token: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub schedule: ScheduleConfig,
}

const DEFAULT_DATABASE_URL: &str = "postgresql+psycopg://user:password@db:5432/letsee";

impl AppConfig {
    /// Reads `config_path` when it exists, loads `.env`, then applies the process environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw_json_config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        dotenv::dotenv().ok();
        Self::from_sources(raw_json_config, |key| env::var(key).ok())
    }

    /// Environment values win over config.json values, which win over defaults.
    pub fn from_sources<F>(raw: RawJsonConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s3_raw = raw.s3_storage.unwrap_or_default();
        let sched_raw = raw.schedule.unwrap_or_default();
        let defaults = ScheduleConfig::default();

        let text = |key: &str, json: Option<String>, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .or(json.filter(|v| !v.trim().is_empty()))
                .unwrap_or_else(|| default.to_string())
        };

        let storage = StorageConfig {
            endpoint_url: text("MINIO_URL", s3_raw.endpoint_url, "http://minio:9000"),
            region: text("MINIO_REGION", s3_raw.region, "us-east-1"),
            access_key_id: text("MINIO_ACCESS_KEY", s3_raw.access_key_id, "minioadmin"),
            secret_access_key: text("MINIO_SECRET_KEY", s3_raw.secret_access_key, "minioadmin"),
        };

        let secs = |key: &str, json: Option<u64>, default: Duration| -> Result<Duration> {
            Ok(parsed(&lookup, key, json)?.map_or(default, Duration::from_secs))
        };

        let retention = RetentionWindow {
            keep_daily: parsed(&lookup, "BACKUP_KEEP_DAILY", sched_raw.keep_daily)?
                .unwrap_or(defaults.retention.keep_daily),
            keep_hourly: parsed(&lookup, "BACKUP_KEEP_HOURLY", sched_raw.keep_hourly)?
                .unwrap_or(defaults.retention.keep_hourly),
        };

        let schedule = ScheduleConfig {
            backup_initial_delay: secs(
                "BACKUP_INITIAL_DELAY_SECONDS",
                sched_raw.backup_initial_delay_seconds,
                defaults.backup_initial_delay,
            )?,
            backup_interval: secs(
                "SCHEDULER_BACKUP_INTERVAL_SECONDS",
                sched_raw.backup_interval_seconds,
                defaults.backup_interval,
            )?,
            run_loop_interval: secs(
                "BACKUP_INTERVAL_SECONDS",
                sched_raw.run_loop_interval_seconds,
                defaults.run_loop_interval,
            )?,
            cleanup_initial_delay: secs(
                "CLEANUP_INITIAL_DELAY_SECONDS",
                sched_raw.cleanup_initial_delay_seconds,
                defaults.cleanup_initial_delay,
            )?,
            cleanup_interval: secs(
                "CLEANUP_INTERVAL_SECONDS",
                sched_raw.cleanup_interval_seconds,
                defaults.cleanup_interval,
            )?,
            retention,
            shutdown_grace: parsed(&lookup, "SHUTDOWN_GRACE_SECONDS", sched_raw.shutdown_grace_seconds)?
                .map(Duration::from_secs),
            loop_backup_type: parsed(&lookup, "BACKUP_TYPE", sched_raw.backup_type)?
                .unwrap_or(defaults.loop_backup_type),
        };

        if schedule.backup_interval.is_zero()
            || schedule.cleanup_interval.is_zero()
            || schedule.run_loop_interval.is_zero()
        {
            anyhow::bail!("Backup and cleanup intervals must be greater than zero seconds.");
        }

        Ok(AppConfig {
            database_url: text("DATABASE_URL", raw.database_url, DEFAULT_DATABASE_URL),
            storage,
            dump_program: text("PG_DUMP_PATH", raw.dump_program, "pg_dump"),
            restore_program: text("PSQL_PATH", raw.restore_program, "psql"),
            bind_addr: text("BIND_ADDR", raw.bind_addr, "0.0.0.0:8000"),
            api_token: lookup("BACKUP_API_TOKEN")
                .or(raw.api_token)
                .filter(|t| !t.trim().is_empty()),
            log_level: text("LOG_LEVEL", raw.log_level, "info"),
            log_format: parsed(&lookup, "LOG_FORMAT", raw.log_format)?.unwrap_or_default(),
            schedule,
        })
    }
}

/// Env value (parsed) if set, otherwise the config.json value.
fn parsed<T, F>(lookup: &F, key: &str, json: Option<T>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", value, key, e)),
        None => Ok(json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_any_source() -> anyhow::Result<()> {
        let config = AppConfig::from_sources(RawJsonConfig::default(), env_of(&[]))?;
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.storage.endpoint_url, "http://minio:9000");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.dump_program, "pg_dump");
        assert_eq!(config.restore_program, "psql");
        assert_eq!(config.api_token, None);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(config.schedule.retention, RetentionWindow { keep_daily: 7, keep_hourly: 24 });
        assert_eq!(config.schedule.backup_interval, Duration::from_secs(3600));
        assert_eq!(config.schedule.run_loop_interval, Duration::from_secs(86400));
        Ok(())
    }

    #[test]
    fn test_runner_interval_does_not_touch_scheduler() -> anyhow::Result<()> {
        let config = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("BACKUP_INTERVAL_SECONDS", "7200")]),
        )?;
        assert_eq!(config.schedule.run_loop_interval, Duration::from_secs(7200));
        assert_eq!(config.schedule.backup_interval, Duration::from_secs(3600));

        let config = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("SCHEDULER_BACKUP_INTERVAL_SECONDS", "1800")]),
        )?;
        assert_eq!(config.schedule.backup_interval, Duration::from_secs(1800));
        assert_eq!(config.schedule.run_loop_interval, Duration::from_secs(86400));
        Ok(())
    }

    #[test]
    fn test_env_overrides_json() -> anyhow::Result<()> {
        let raw: RawJsonConfig = serde_json::from_value(json!({
            "database_url": "postgres://json@h/json",
            "log_format": "json",
            "s3_storage": { "endpoint_url": "http://json:9000", "region": "eu-west-1" },
            "schedule": { "backup_interval_seconds": 120, "keep_daily": 3 }
        }))?;
        let config = AppConfig::from_sources(
            raw,
            env_of(&[
                ("DATABASE_URL", "postgres://env@h/env"),
                ("BACKUP_KEEP_DAILY", "2"),
                ("BACKUP_KEEP_HOURLY", "0"),
                ("BACKUP_API_TOKEN", "tok"),
                ("SHUTDOWN_GRACE_SECONDS", "30"),
                ("BACKUP_TYPE", "manual"),
            ]),
        )?;

        assert_eq!(config.database_url, "postgres://env@h/env");
        assert_eq!(config.storage.endpoint_url, "http://json:9000");
        assert_eq!(config.storage.region, "eu-west-1");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.schedule.backup_interval, Duration::from_secs(120));
        assert_eq!(config.schedule.retention, RetentionWindow { keep_daily: 2, keep_hourly: 0 });
        assert_eq!(config.schedule.shutdown_grace, Some(Duration::from_secs(30)));
        assert_eq!(config.schedule.loop_backup_type, BackupType::Manual);
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        Ok(())
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let result = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("BACKUP_INTERVAL_SECONDS", "hourly")]),
        );
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("BACKUP_INTERVAL_SECONDS"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("CLEANUP_INTERVAL_SECONDS", "0")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_token_counts_as_unset() -> anyhow::Result<()> {
        let config = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("BACKUP_API_TOKEN", "   ")]),
        )?;
        assert_eq!(config.api_token, None);
        Ok(())
    }

    #[test]
    fn test_storage_debug_redacts_secret() -> anyhow::Result<()> {
        let config = AppConfig::from_sources(
            RawJsonConfig::default(),
            env_of(&[("MINIO_SECRET_KEY", "very-secret")]),
        )?;
        assert!(!format!("{:?}", config.storage).contains("very-secret"));
        Ok(())
    }

    #[test]
    fn test_load_reads_json_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{ "dump_program": "/opt/pg/bin/pg_dump" }}"#)?;
        let config = AppConfig::load(file.path())?;
        // PG_DUMP_PATH is not expected in the test environment.
        if env::var("PG_DUMP_PATH").is_err() {
            assert_eq!(config.dump_program, "/opt/pg/bin/pg_dump");
        }
        Ok(())
    }

    #[test]
    fn test_load_rejects_invalid_json() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "{{ not json")?;
        assert!(AppConfig::load(file.path()).is_err());
        Ok(())
    }
}
