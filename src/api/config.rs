//! Config API endpoints

use axum::{Json, extract::State as AxumState, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::{AssemblaSettings, SharedState, reload_config};

/// Settings as shown to clients; secrets are never included
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub path: String,
    pub assembla: AssemblaSettings,
    pub api_enabled: bool,
    pub webhook_signature_required: bool,
    pub max_builds: usize,
    pub job_count: usize,
}

/// GET /api/config - Current global settings
pub async fn get_config(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let config = state.config.read().unwrap_or_else(|p| p.into_inner());

    Json(ConfigResponse {
        path: state.config_path.to_string_lossy().into_owned(),
        assembla: config.assembla.clone(),
        api_enabled: config.assembla.has_credentials(),
        webhook_signature_required: config
            .webhook_secret
            .as_ref()
            .is_some_and(|s| !s.is_empty()),
        max_builds: config.max_builds,
        job_count: config.jobs.len(),
    })
}

/// POST /api/reload - Reload configuration from disk and re-sync triggers
pub async fn reload_config_endpoint(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let result = match reload_config(&state.config_path).await {
        Ok(new_config) => {
            let job_count = new_config.jobs.len();
            state.reload(new_config).await.map(|()| job_count)
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(job_count) => {
            info!(
                "Configuration reloaded from {:?}, {} job(s)",
                state.config_path, job_count
            );
            Json(json!({
                "status": "success",
                "message": "Configuration reloaded successfully"
            }))
            .into_response()
        }
        Err(e) => {
            error!("Failed to reload config: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
                .into_response()
        }
    }
}
