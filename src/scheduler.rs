//! Scheduling seam
//!
//! The trigger engine never runs builds. It hands them to a [`BuildScheduler`]
//! and reads job settings from a [`JobCatalog`]. [`LocalScheduler`] is the
//! in-process implementation used by the server: it records builds in memory
//! and broadcasts them to listeners.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::info;

use crate::JobDefinition;
use crate::build::{Build, BuildStore};
use crate::cause::Cause;
use crate::error::{Result, TriggerError};
use crate::invoke::ParameterSet;
use crate::registry::JobId;

const BUILD_EVENT_CAPACITY: usize = 100;

/// Returned by the scheduler for every accepted build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildHandle {
    pub build_id: String,
    pub job: JobId,
    pub not_before: DateTime<Utc>,
}

/// Broadcast whenever a build is scheduled
#[derive(Debug, Clone, Serialize)]
pub struct BuildEvent {
    pub event_type: String,
    pub build_id: String,
    pub job: JobId,
    pub short_description: String,
    pub timestamp: String,
}

#[async_trait]
pub trait BuildScheduler: Send + Sync {
    /// Schedules `job` after `quiet_period_secs`, with `cause` as the audit
    /// record and `parameters` as its full parameter set.
    async fn schedule(
        &self,
        job: &JobId,
        quiet_period_secs: u64,
        cause: Cause,
        parameters: ParameterSet,
    ) -> Result<BuildHandle>;
}

/// Job configuration as the host knows it
pub trait JobCatalog: Send + Sync {
    fn job(&self, id: &JobId) -> Option<JobDefinition>;
}

pub struct LocalScheduler {
    jobs: RwLock<BTreeMap<JobId, JobDefinition>>,
    builds: Mutex<BuildStore>,
    events: broadcast::Sender<BuildEvent>,
}

impl LocalScheduler {
    pub fn new(jobs: &[JobDefinition], max_builds: usize) -> Self {
        let (events, _) = broadcast::channel(BUILD_EVENT_CAPACITY);
        let scheduler = Self {
            jobs: RwLock::new(BTreeMap::new()),
            builds: Mutex::new(BuildStore::new(max_builds)),
            events,
        };
        scheduler.replace_jobs(jobs);
        scheduler
    }

    /// Swaps in a freshly loaded job configuration.
    pub fn replace_jobs(&self, jobs: &[JobDefinition]) {
        let mut guard = self.jobs.write().unwrap_or_else(|p| p.into_inner());
        *guard = jobs.iter().map(|j| (j.id(), j.clone())).collect();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    pub fn get_build(&self, id: &str) -> Option<Build> {
        let store = self.builds.lock().unwrap_or_else(|p| p.into_inner());
        store.get_build(id).cloned()
    }

    pub fn get_recent_builds(&self, limit: usize) -> Vec<Build> {
        let store = self.builds.lock().unwrap_or_else(|p| p.into_inner());
        store.get_recent_builds(limit)
    }

    pub fn get_builds_by_job(&self, job: &str, limit: usize) -> Vec<Build> {
        let store = self.builds.lock().unwrap_or_else(|p| p.into_inner());
        store.get_builds_by_job(job, limit)
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl JobCatalog for LocalScheduler {
    fn job(&self, id: &JobId) -> Option<JobDefinition> {
        let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        jobs.get(id).cloned()
    }
}

#[async_trait]
impl BuildScheduler for LocalScheduler {
    async fn schedule(
        &self,
        job: &JobId,
        quiet_period_secs: u64,
        cause: Cause,
        parameters: ParameterSet,
    ) -> Result<BuildHandle> {
        let definition = self
            .job(job)
            .ok_or_else(|| TriggerError::scheduling(job.as_str(), "unknown job"))?;
        if !definition.enabled {
            return Err(TriggerError::scheduling(job.as_str(), "job is disabled"));
        }

        let build = Build::new(job.clone(), quiet_period_secs, cause, parameters);
        let handle = BuildHandle {
            build_id: build.id.clone(),
            job: job.clone(),
            not_before: build.not_before,
        };
        let event = BuildEvent {
            event_type: "scheduled".to_string(),
            build_id: build.id.clone(),
            job: job.clone(),
            short_description: build.short_description.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };

        info!(
            "Scheduled build {} for job '{}': {}",
            build.id, job, build.short_description
        );
        {
            let mut store = self.builds.lock().unwrap_or_else(|p| p.into_inner());
            store.add_build(build);
        }
        // No subscribers is fine
        let _ = self.events.send(event);

        Ok(handle)
    }
}
