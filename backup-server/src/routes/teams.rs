use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::team::{EncryptedField, EnrollmentPayload, RotationRequest, TeamKdfParams, WrappedKeyBundle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/{team_id}/encryption", get(get_encryption).put(enroll))
        .route("/{team_id}/encryption/verify", post(verify))
        .route("/{team_id}/encryption/unlock", post(unlock))
        .route("/{team_id}/encryption/rotate", post(rotate))
        .route(
            "/{team_id}/reports/{report_id}/sensitive",
            get(load_sensitive).put(store_sensitive),
        )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionStatus {
    pub enrolled: bool,
    pub default_iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<TeamKdfParams>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierRequest {
    pub verifier_b64: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

async fn get_encryption(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
) -> Result<Json<EncryptionStatus>, AppError> {
    let service = state.service.clone();
    let params = tokio::task::spawn_blocking(move || match service.team().kdf_params(&team_id) {
        Ok(params) => Ok(Some(params)),
        Err(backup_engine::EngineError::TeamNotEnrolled(_)) => Ok(None),
        Err(e) => Err(e),
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(EncryptionStatus {
        enrolled: params.is_some(),
        default_iterations: state.config.engine.team.default_iterations,
        params,
    }))
}

async fn enroll(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
    Json(payload): Json<EnrollmentPayload>,
) -> Result<(StatusCode, Json<TeamKdfParams>), AppError> {
    let service = state.service.clone();
    let params = tokio::task::spawn_blocking(move || service.team().enroll(&team_id, &payload))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok((StatusCode::CREATED, Json(params)))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
    Json(request): Json<VerifierRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let service = state.service.clone();
    let valid = tokio::task::spawn_blocking(move || service.team().verify(&team_id, &request.verifier_b64))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(VerifyResponse { valid }))
}

async fn unlock(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
    Json(request): Json<VerifierRequest>,
) -> Result<Json<WrappedKeyBundle>, AppError> {
    let service = state.service.clone();
    let bundle = tokio::task::spawn_blocking(move || service.team().unlock(&team_id, &request.verifier_b64))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    bundle
        .map(Json)
        .ok_or_else(|| AppError::Unauthorized("Team password is incorrect".into()))
}

async fn rotate(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
    Json(request): Json<RotationRequest>,
) -> Result<Json<TeamKdfParams>, AppError> {
    let service = state.service.clone();
    let params = tokio::task::spawn_blocking(move || service.team().change_password(&team_id, &request))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(params))
}

async fn load_sensitive(
    State(state): State<Arc<AppState>>,
    Path((team_id, report_id)): Path<(String, String)>,
) -> Result<Json<EncryptedField>, AppError> {
    let service = state.service.clone();
    let field = tokio::task::spawn_blocking(move || service.team().load_encrypted_field(&team_id, &report_id))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    field
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No encrypted payload for this report".into()))
}

async fn store_sensitive(
    State(state): State<Arc<AppState>>,
    Path((team_id, report_id)): Path<(String, String)>,
    Json(field): Json<EncryptedField>,
) -> Result<StatusCode, AppError> {
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.team().store_encrypted_field(&team_id, &report_id, &field))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(StatusCode::NO_CONTENT)
}
