//! Build invocation
//!
//! Turns a [`Cause`] into the parameter set of a build and hands both to the
//! scheduler.

use std::collections::BTreeMap;
use tracing::{error, info};

use crate::JobDefinition;
use crate::cause::Cause;
use crate::error::Result;
use crate::scheduler::{BuildHandle, BuildScheduler};

pub const MERGE_REQUEST_ID_PARAM: &str = "assemblaMergeRequestId";
pub const SOURCE_SPACE_ID_PARAM: &str = "assemblaSourceSpaceId";
pub const SOURCE_REPOSITORY_PARAM: &str = "assemblaSourceRepository";
pub const SOURCE_BRANCH_PARAM: &str = "assemblaSourceBranch";
pub const TARGET_BRANCH_PARAM: &str = "assemblaTargetBranch";
pub const DESCRIPTION_PARAM: &str = "assemblaDescription";

/// Build parameters, name to value, in stable order
pub type ParameterSet = BTreeMap<String, String>;

/// Job defaults overlaid with the cause values. Cause values always win,
/// including empty ones.
pub fn merge_parameters(defaults: &BTreeMap<String, String>, cause: &Cause) -> ParameterSet {
    let details = cause.details();
    let mut values = defaults.clone();

    let cause_values = [
        (
            MERGE_REQUEST_ID_PARAM,
            cause
                .merge_request_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ),
        (SOURCE_SPACE_ID_PARAM, details.source_space_id.clone()),
        (SOURCE_REPOSITORY_PARAM, details.source_repository_name.clone()),
        (SOURCE_BRANCH_PARAM, details.source_branch.clone()),
        (TARGET_BRANCH_PARAM, cause.target_branch().to_string()),
        (DESCRIPTION_PARAM, cause.description().to_string()),
    ];
    for (name, value) in cause_values {
        values.insert(name.to_string(), value);
    }
    values
}

/// Schedules `job` for `cause`.
pub async fn invoke(
    scheduler: &dyn BuildScheduler,
    job: &JobDefinition,
    cause: Cause,
) -> Result<BuildHandle> {
    let parameters = merge_parameters(&job.parameters, &cause);
    info!(
        "Starting job '{}' (space '{}', repo '{}'): {}",
        job.name,
        job.space_name,
        job.repo_name,
        cause.short_description()
    );

    scheduler
        .schedule(&job.id(), job.quiet_period_secs, cause, parameters)
        .await
        .inspect_err(|e| error!("Could not schedule job '{}': {}", job.name, e))
}
