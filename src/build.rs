use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::cause::Cause;
use crate::registry::JobId;

/// Represents the status of a scheduled build
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Waiting for its quiet period to end
    Pending,
    Queued,
}

/// A build handed to the scheduler, with the cause that triggered it
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub id: String,
    pub job: JobId,
    pub short_description: String,
    pub cause: Cause,
    pub parameters: BTreeMap<String, String>,
    pub scheduled_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
}

impl Build {
    pub fn new(
        job: JobId,
        quiet_period_secs: u64,
        cause: Cause,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        let scheduled_at = Utc::now();
        let not_before = i64::try_from(quiet_period_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|quiet_period| scheduled_at.checked_add_signed(quiet_period))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::now_v7().to_string(),
            job,
            short_description: cause.short_description(),
            cause,
            parameters,
            scheduled_at,
            not_before,
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> BuildStatus {
        if now < self.not_before {
            BuildStatus::Pending
        } else {
            BuildStatus::Queued
        }
    }
}

/// Bounded in-memory history of scheduled builds, oldest evicted first
#[derive(Debug)]
pub struct BuildStore {
    builds: VecDeque<Build>,
    max_builds: usize,
}

impl BuildStore {
    pub fn new(max_builds: usize) -> Self {
        Self {
            builds: VecDeque::new(),
            max_builds: max_builds.max(1),
        }
    }

    pub fn add_build(&mut self, build: Build) {
        while self.builds.len() >= self.max_builds {
            self.builds.pop_front();
        }
        self.builds.push_back(build);
    }

    pub fn get_build(&self, id: &str) -> Option<&Build> {
        self.builds.iter().find(|b| b.id == id)
    }

    /// Most recent first
    pub fn get_recent_builds(&self, limit: usize) -> Vec<Build> {
        self.builds.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_builds_by_job(&self, job: &str, limit: usize) -> Vec<Build> {
        self.builds
            .iter()
            .rev()
            .filter(|b| b.job.as_str() == job)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}
