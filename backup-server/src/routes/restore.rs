use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use backup_engine::{RestoreMode, RestoreOutcome};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/{name}/preview", post(preview_archive))
        .route("/{name}/apply", post(apply_archive))
        .route(
            "/upload",
            post(restore_upload).layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub mode: Option<RestoreMode>,
}

async fn preview_archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RestoreOutcome>, AppError> {
    restore_archive(state, name, RestoreMode::Preview).await
}

async fn apply_archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RestoreOutcome>, AppError> {
    restore_archive(state, name, RestoreMode::Apply).await
}

async fn restore_archive(
    state: Arc<AppState>,
    name: String,
    mode: RestoreMode,
) -> Result<Json<RestoreOutcome>, AppError> {
    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || service.restore_archive(&name, mode))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(outcome))
}

async fn restore_upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<RestoreOutcome>, AppError> {
    let mode = query.mode.unwrap_or(RestoreMode::Preview);
    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || service.restore_upload(&body, mode))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(outcome))
}
