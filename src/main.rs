//! LetSee database backup service
//!
//! Dumps the PostgreSQL database into S3-compatible storage on a schedule,
//! prunes old automatic backups, and exposes manual backup/restore over HTTP
//! and the command line.

// letsee-backup/src/main.rs
mod api;
mod backup;
mod config;
mod errors;
mod restore;
mod scheduler;
mod storage;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use backup::credentials::DatabaseCredentials;
use backup::executor::PgClientTools;
use backup::{BackupManager, BackupType, RetentionWindow, validate_backup_filename};
use config::{AppConfig, LogFormat};
use scheduler::BackupScheduler;
use storage::S3ObjectStore;

#[derive(Debug, Parser)]
#[command(name = "letsee-backup", version, about = "Database backup and retention manager")]
struct Cli {
    /// Optional JSON config file; environment variables override its values.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control API with the backup scheduler (default)
    Serve,
    /// Take one backup now
    Backup {
        #[arg(long = "type", default_value = "manual")]
        backup_type: BackupType,
    },
    /// Replay a stored backup into the database
    Restore { filename: String },
    /// Show stored backups, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete automatic backups beyond the retention window
    Cleanup {
        #[arg(long)]
        keep_daily: Option<usize>,
        #[arg(long)]
        keep_hourly: Option<usize>,
    },
    /// Back up and prune in a foreground loop until interrupted
    RunLoop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Fatal error");
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    init_tracing(&config);

    match DatabaseCredentials::from_url(&config.database_url) {
        Ok(creds) => info!(database = ?creds, storage = ?config.storage, "Configuration loaded"),
        Err(e) => warn!(error = %e, "DATABASE_URL is not a valid connection URI; backups will fail"),
    }

    let store = Arc::new(S3ObjectStore::connect(&config.storage).await);
    let executor = Arc::new(PgClientTools::new(&config.dump_program, &config.restore_program));
    let manager = Arc::new(BackupManager::new(store, executor, config.database_url.clone()));
    manager.ensure_bucket().await;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, manager).await,
        Command::Backup { backup_type } => Ok(match manager.create_backup(backup_type).await {
            Some(filename) => {
                println!("Backup created: {}", filename);
                ExitCode::SUCCESS
            }
            None => ExitCode::FAILURE,
        }),
        Command::Restore { filename } => {
            validate_backup_filename(&filename)?;
            Ok(if manager.restore_backup(&filename).await {
                println!("Backup '{}' restored successfully", filename);
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List { limit } => {
            let backups = manager.list_backups(limit).await;
            for record in &backups {
                println!(
                    "{:<40} {:>10.2} MB  {}",
                    record.filename,
                    record.size_mb(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            println!("{} backup(s)", backups.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup { keep_daily, keep_hourly } => {
            let retention = RetentionWindow {
                keep_daily: keep_daily.unwrap_or(config.schedule.retention.keep_daily),
                keep_hourly: keep_hourly.unwrap_or(config.schedule.retention.keep_hourly),
            };
            let deleted = manager.cleanup_old_backups(retention).await;
            println!("Deleted {} old backup(s)", deleted);
            Ok(ExitCode::SUCCESS)
        }
        Command::RunLoop => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                trigger.cancel();
            });
            info!(interval_s = config.schedule.run_loop_interval.as_secs(), "Starting backup loop");
            scheduler::run_backup_loop(manager, config.schedule.clone(), shutdown).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: &AppConfig, manager: Arc<BackupManager>) -> Result<ExitCode> {
    let token = config
        .api_token
        .clone()
        .context("BACKUP_API_TOKEN must be set to serve the control API")?;

    let scheduler = Arc::new(BackupScheduler::new(manager.clone(), config.schedule.clone()));
    scheduler.start().await;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "HTTP server listening");

    let app = api::router(api::ApiState::new(manager, token).with_scheduler(scheduler.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    served.context("HTTP server error")?;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(config: &AppConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(fmt::layer().with_target(false)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(false))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
