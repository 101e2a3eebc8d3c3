//! Builds API endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::SharedState;
use crate::build::{Build, BuildStatus};

/// Query parameters for build listing
#[derive(Debug, Deserialize)]
pub struct BuildsQuery {
    /// Filter by job name
    pub job: Option<String>,
    /// Number of items (default: 50, max: 100)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BuildView {
    #[serde(flatten)]
    pub build: Build,
    pub status: BuildStatus,
}

impl From<Build> for BuildView {
    fn from(build: Build) -> Self {
        let status = build.status_at(Utc::now());
        Self { build, status }
    }
}

#[derive(Debug, Serialize)]
pub struct BuildsResponse {
    pub builds: Vec<BuildView>,
    pub total: usize,
    pub limit: usize,
}

/// GET /api/builds - Recent builds, optionally for one job
pub async fn get_builds(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<BuildsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).min(100);

    let builds = match &params.job {
        Some(job) => state.scheduler.get_builds_by_job(job, limit),
        None => state.scheduler.get_recent_builds(limit),
    };

    Json(BuildsResponse {
        total: builds.len(),
        builds: builds.into_iter().map(BuildView::from).collect(),
        limit,
    })
}

/// GET /api/builds/{id} - One build by id
pub async fn get_build(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.get_build(&id) {
        Some(build) => Json(BuildView::from(build)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Build not found"})),
        )
            .into_response(),
    }
}
