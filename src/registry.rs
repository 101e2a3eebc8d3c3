//! Registry of which jobs listen to which repository
//!
//! Bindings are keyed by repository name only. The space name is accepted and
//! logged but not part of the key, so two spaces with identically named
//! repositories share their bindings.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::JobDefinition;

/// Identifier of a build job, as known to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One repository and the jobs bound to it, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSnapshot {
    pub repo_name: String,
    pub jobs: Vec<JobId>,
}

#[derive(Debug, Default)]
pub struct TriggerRegistry {
    bindings: Mutex<Bindings>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Bindings> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds `job` to `repo_name`. Empty repository names or job ids are ignored.
    pub fn register(&self, space_name: &str, repo_name: &str, job: &JobId) {
        bind(&mut self.lock(), space_name, repo_name, job);
    }

    /// Removes the binding if present.
    pub fn unregister(&self, space_name: &str, repo_name: &str, job: &JobId) {
        unbind(&mut self.lock(), space_name, repo_name, job);
    }

    /// Jobs bound to `repo_name`; empty when there are none.
    pub fn lookup(&self, repo_name: &str) -> HashSet<JobId> {
        self.lock().get(repo_name).cloned().unwrap_or_default()
    }

    /// Registers a job's trigger unless the job is disabled.
    pub fn start_job(&self, job: &JobDefinition) {
        if !job.enabled {
            info!("Job '{}' is disabled, not starting its trigger", job.name);
            return;
        }
        self.register(&job.space_name, &job.repo_name, &job.id());
    }

    pub fn stop_job(&self, job: &JobDefinition) {
        if job.repo_name.is_empty() {
            return;
        }
        self.unregister(&job.space_name, &job.repo_name, &job.id());
    }

    /// Stops every trigger of `previous` and starts every trigger of `current`.
    ///
    /// Both happen under one lock, so a concurrent `lookup` sees either the
    /// old bindings or the new ones.
    pub fn sync(&self, previous: &[JobDefinition], current: &[JobDefinition]) {
        debug!(
            "Re-syncing triggers: {} old job(s), {} new job(s)",
            previous.len(),
            current.len()
        );
        let mut bindings = self.lock();
        for job in previous.iter().filter(|job| !job.repo_name.is_empty()) {
            unbind(&mut bindings, &job.space_name, &job.repo_name, &job.id());
        }
        for job in current {
            if job.enabled {
                bind(&mut bindings, &job.space_name, &job.repo_name, &job.id());
            } else {
                info!("Job '{}' is disabled, not starting its trigger", job.name);
            }
        }
    }

    /// Sorted copy of all bindings.
    pub fn snapshot(&self) -> Vec<BindingSnapshot> {
        let bindings = self.lock();
        let mut snapshot: Vec<BindingSnapshot> = bindings
            .iter()
            .map(|(repo_name, jobs)| {
                let mut jobs: Vec<JobId> = jobs.iter().cloned().collect();
                jobs.sort();
                BindingSnapshot {
                    repo_name: repo_name.clone(),
                    jobs,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.repo_name.cmp(&b.repo_name));
        snapshot
    }
}

type Bindings = HashMap<String, HashSet<JobId>>;

fn bind(bindings: &mut Bindings, space_name: &str, repo_name: &str, job: &JobId) {
    if repo_name.is_empty() || job.as_str().is_empty() {
        info!(
            "Not adding a trigger (space: '{}', repo: '{}', job: '{}')",
            space_name, repo_name, job
        );
        return;
    }
    if bindings
        .entry(repo_name.to_string())
        .or_default()
        .insert(job.clone())
    {
        info!(
            "Adding trigger for repo '{}' (space '{}') -> job '{}'",
            repo_name, space_name, job
        );
    }
}

fn unbind(bindings: &mut Bindings, space_name: &str, repo_name: &str, job: &JobId) {
    let Some(jobs) = bindings.get_mut(repo_name) else {
        return;
    };
    if jobs.remove(job) {
        info!(
            "Removing trigger for repo '{}' (space '{}') -> job '{}'",
            repo_name, space_name, job
        );
    }
    if jobs.is_empty() {
        bindings.remove(repo_name);
    }
}
