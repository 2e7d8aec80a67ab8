use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::service::VerifyReport;
use backup_engine::{ArchiveInfo, BackupOptions, PruneReport};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/prune", post(prune_backups))
        .route("/{name}", get(download_backup).delete(delete_backup))
        .route("/{name}/verify", get(verify_backup))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneRequest {
    pub days: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ArchiveInfo>>, AppError> {
    let service = state.service.clone();
    let archives = tokio::task::spawn_blocking(move || service.list_backups())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(archives))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(options): Json<BackupOptions>,
) -> Result<(StatusCode, Json<ArchiveInfo>), AppError> {
    let service = state.service.clone();
    let info = tokio::task::spawn_blocking(move || service.create_backup(options))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.service.clone();
    let stored = tokio::task::spawn_blocking(move || service.read_backup(&name))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

    let content_type = if stored.info.encrypted {
        "application/octet-stream"
    } else {
        "application/gzip"
    };
    let disposition = format!("attachment; filename=\"{}\"", stored.info.name);
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        stored.bytes,
    ))
}

async fn verify_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<VerifyReport>, AppError> {
    let service = state.service.clone();
    let report = tokio::task::spawn_blocking(move || service.verify_backup(&name))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(report))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.delete_backup(&name))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(StatusCode::NO_CONTENT)
}

async fn prune_backups(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PruneRequest>,
) -> Result<Json<PruneReport>, AppError> {
    let service = state.service.clone();
    let report = tokio::task::spawn_blocking(move || service.prune(request.days, request.dry_run))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(report))
}
