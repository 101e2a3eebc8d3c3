//! Status endpoint

use axum::{Json, extract::State as AxumState};
use serde::Serialize;

use crate::SharedState;

/// Server statistics
#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerStats {
    pub configured_jobs: usize,
    pub enabled_jobs: usize,
    pub bound_repositories: usize,
    pub builds_recorded: usize,
    pub api_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerStats,
    pub triggers: TriggerStats,
}

/// GET /status - Server and trigger overview
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<StatusResponse> {
    let (configured_jobs, enabled_jobs, api_enabled) = {
        let config = state.config.read().unwrap_or_else(|p| p.into_inner());
        (
            config.jobs.len(),
            config.jobs.iter().filter(|j| j.enabled).count(),
            config.assembla.has_credentials(),
        )
    };

    Json(StatusResponse {
        server: ServerStats {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            started_at: state.started_at.to_rfc3339(),
        },
        triggers: TriggerStats {
            configured_jobs,
            enabled_jobs,
            bound_repositories: state.service.registry().snapshot().len(),
            builds_recorded: state.scheduler.build_count(),
            api_enabled,
        },
    })
}
