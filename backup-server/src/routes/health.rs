use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "restoreEnabled": state.service.restore_enabled(),
        "backupDirReady": state.config.engine.backup.dir.is_dir(),
        "encryptionConfigured": state.config.engine.backup.passphrase.is_some(),
    }))
}
