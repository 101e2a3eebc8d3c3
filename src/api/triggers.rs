//! Trigger bindings listing

use axum::{Json, extract::State as AxumState, response::IntoResponse};
use serde::Serialize;

use crate::SharedState;
use crate::policy::TriggerConfig;
use crate::registry::BindingSnapshot;

#[derive(Debug, Serialize)]
pub struct JobTriggerView {
    pub name: String,
    pub enabled: bool,
    pub trigger: TriggerConfig,
    pub parameters: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggersResponse {
    pub bindings: Vec<BindingSnapshot>,
    pub jobs: Vec<JobTriggerView>,
}

/// GET /api/triggers - Active bindings and configured job triggers
pub async fn get_triggers(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let bindings = state.service.registry().snapshot();
    let jobs = {
        let config = state.config.read().unwrap_or_else(|p| p.into_inner());
        config
            .jobs
            .iter()
            .map(|job| JobTriggerView {
                name: job.name.clone(),
                enabled: job.enabled,
                trigger: job.trigger_config(),
                parameters: job.parameters.keys().cloned().collect(),
            })
            .collect()
    };

    Json(TriggersResponse { bindings, jobs })
}
