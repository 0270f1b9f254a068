// letsee-backup/src/api/mod.rs
pub mod error;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backup::{BackupManager, BackupRecord, BackupType, RetentionWindow, validate_backup_filename};
use crate::scheduler::BackupScheduler;
use error::ApiError;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<BackupManager>,
    token: Arc<str>,
    /// Held for the duration of a restore; a second caller gets 409.
    pub restore_lock: Arc<Mutex<()>>,
    scheduler: Option<Arc<BackupScheduler>>,
}

impl ApiState {
    pub fn new(manager: Arc<BackupManager>, token: impl Into<Arc<str>>) -> Self {
        ApiState {
            manager,
            token: token.into(),
            restore_lock: Arc::new(Mutex::new(())),
            scheduler: None,
        }
    }

    /// Reports the scheduler's state on `/health`.
    pub fn with_scheduler(mut self, scheduler: Arc<BackupScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Runs `work` on its own task and waits for it. A client that disconnects
/// drops only the wait, so a dump or psql run is never killed halfway.
async fn detached<F>(work: F) -> Result<F::Output, ApiError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        error!(error = %e, "Backup task ended abnormally");
        ApiError::OperationFailed("Backup operation failed")
    })
}

/// Admits requests carrying `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct RequireBearer;

impl FromRequestParts<ApiState> for RequireBearer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

        match provided {
            Some(token) if bool::from(token.as_bytes().ct_eq(state.token.as_bytes())) => Ok(RequireBearer),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let backups = Router::new()
        .route("/list", get(list_backups))
        .route("/create", post(create_backup))
        .route("/restore/{backup_filename}", post(restore_backup))
        .route("/cleanup", post(cleanup_backups));

    Router::new()
        .nest("/api/backups", backups)
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct BackupView {
    filename: String,
    size_bytes: u64,
    size_mb: f64,
    created_at: DateTime<Utc>,
    backup_type: Option<BackupType>,
}

impl From<BackupRecord> for BackupView {
    fn from(record: BackupRecord) -> Self {
        BackupView {
            size_mb: record.size_mb(),
            filename: record.filename,
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            backup_type: record.backup_type,
        }
    }
}

#[derive(Debug, Serialize)]
struct ListResponse {
    backups: Vec<BackupView>,
    total: usize,
}

async fn list_backups(
    _auth: RequireBearer,
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Json<ListResponse> {
    let records = state
        .manager
        .list_backups(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await;
    let backups: Vec<BackupView> = records.into_iter().map(BackupView::from).collect();
    Json(ListResponse {
        total: backups.len(),
        backups,
    })
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    backup_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateResponse {
    success: bool,
    backup_filename: String,
    message: &'static str,
}

async fn create_backup(
    _auth: RequireBearer,
    State(state): State<ApiState>,
    Query(params): Query<CreateParams>,
) -> Result<Json<CreateResponse>, ApiError> {
    let backup_type = match params.backup_type.as_deref() {
        Some(kind) => kind.parse::<BackupType>()?,
        None => BackupType::Manual,
    };

    info!(backup_type = %backup_type, "Backup requested via API");
    let manager = state.manager.clone();
    let backup_filename = detached(async move { manager.create_backup(backup_type).await })
        .await?
        .ok_or(ApiError::OperationFailed("Failed to create backup"))?;

    Ok(Json(CreateResponse {
        success: true,
        backup_filename,
        message: "Backup created successfully",
    }))
}

#[derive(Debug, Serialize)]
struct RestoreResponse {
    success: bool,
    message: String,
}

async fn restore_backup(
    _auth: RequireBearer,
    State(state): State<ApiState>,
    Path(backup_filename): Path<String>,
) -> Result<Json<RestoreResponse>, ApiError> {
    if let Err(e) = validate_backup_filename(&backup_filename) {
        warn!(filename = %backup_filename, "Rejected restore request");
        return Err(e.into());
    }

    let Ok(guard) = state.restore_lock.clone().try_lock_owned() else {
        warn!(filename = %backup_filename, "Restore rejected, another restore is running");
        return Err(ApiError::RestoreInProgress);
    };

    info!(filename = %backup_filename, "Restore requested via API");
    let manager = state.manager.clone();
    let filename = backup_filename.clone();
    // The guard moves into the task so the slot stays taken until psql exits.
    let restored = detached(async move {
        let _guard = guard;
        manager.restore_backup(&filename).await
    })
    .await?;
    if !restored {
        return Err(ApiError::OperationFailed("Failed to restore backup"));
    }

    Ok(Json(RestoreResponse {
        success: true,
        message: format!("Backup '{}' restored successfully", backup_filename),
    }))
}

#[derive(Debug, Deserialize)]
struct CleanupParams {
    keep_daily: Option<usize>,
    keep_hourly: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    success: bool,
    deleted_count: usize,
}

async fn cleanup_backups(
    _auth: RequireBearer,
    State(state): State<ApiState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let defaults = RetentionWindow::default();
    let retention = RetentionWindow {
        keep_daily: params.keep_daily.unwrap_or(defaults.keep_daily),
        keep_hourly: params.keep_hourly.unwrap_or(defaults.keep_hourly),
    };

    let manager = state.manager.clone();
    let deleted_count = detached(async move { manager.try_cleanup_old_backups(retention).await })
        .await?
        .map_err(|e| {
            error!(error = %e, "Cleanup requested via API failed");
            ApiError::OperationFailed("Failed to clean up backups")
        })?;

    Ok(Json(CleanupResponse {
        success: true,
        deleted_count,
    }))
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let scheduler_running = match &state.scheduler {
        Some(scheduler) => scheduler.is_running().await,
        None => false,
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "scheduler_running": scheduler_running,
    }))
}
