//! End-to-end handling of one webhook delivery
//!
//! normalize -> registry lookup -> per-binding policy -> cause -> schedule.
//! Every binding is handled on its own: a failed lookup or a rejected build
//! only affects that binding.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use crate::assembla::RepositoryApi;
use crate::error::Result;
use crate::invoke::invoke;
use crate::policy::{self, Decision};
use crate::registry::{JobId, TriggerRegistry};
use crate::scheduler::{BuildHandle, BuildScheduler, JobCatalog};
use crate::webhook::{EventKind, WebhookEvent, normalize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum BindingOutcome {
    Scheduled(BuildHandle),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingReport {
    pub job: JobId,
    #[serde(flatten)]
    pub outcome: BindingOutcome,
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub space_wiki_name: String,
    pub repository: String,
    pub kind: EventKind,
    pub action: Option<String>,
    pub bindings: Vec<BindingReport>,
}

impl DispatchReport {
    pub fn scheduled(&self) -> impl Iterator<Item = &BuildHandle> {
        self.bindings.iter().filter_map(|b| match &b.outcome {
            BindingOutcome::Scheduled(handle) => Some(handle),
            _ => None,
        })
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled().count()
    }
}

#[derive(Clone)]
pub struct TriggerService {
    registry: Arc<TriggerRegistry>,
    api: Arc<RwLock<Arc<dyn RepositoryApi>>>,
    scheduler: Arc<dyn BuildScheduler>,
    catalog: Arc<dyn JobCatalog>,
}

impl TriggerService {
    pub fn new(
        registry: Arc<TriggerRegistry>,
        api: Arc<dyn RepositoryApi>,
        scheduler: Arc<dyn BuildScheduler>,
        catalog: Arc<dyn JobCatalog>,
    ) -> Self {
        Self {
            registry,
            api: Arc::new(RwLock::new(api)),
            scheduler,
            catalog,
        }
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// The repository API lookups currently go through.
    pub fn repository_api(&self) -> Arc<dyn RepositoryApi> {
        self.api.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Swaps the repository API; lookups already running keep the old one.
    pub fn replace_repository_api(&self, api: Arc<dyn RepositoryApi>) {
        *self.api.write().unwrap_or_else(|p| p.into_inner()) = api;
    }

    /// Normalizes a raw webhook body and handles it.
    pub async fn handle_payload(&self, raw: &[u8]) -> Result<DispatchReport> {
        let event = normalize(raw).inspect_err(|e| warn!("Dropping webhook: {}", e))?;
        Ok(self.handle_event(&event).await)
    }

    pub async fn handle_event(&self, event: &WebhookEvent) -> DispatchReport {
        let mut report = DispatchReport {
            space_wiki_name: event.space_wiki_name.clone(),
            repository: event.repository_key().to_string(),
            kind: event.kind,
            action: event.action.as_ref().map(|a| a.to_string()),
            bindings: Vec::new(),
        };

        if !event.should_trigger_build() {
            info!(
                "Ignoring {:?} event for space '{}' (action: {:?})",
                event.kind, event.space_wiki_name, report.action
            );
            return report;
        }

        let mut jobs: Vec<JobId> = self.registry.lookup(event.repository_key()).into_iter().collect();
        jobs.sort();
        if jobs.is_empty() {
            info!(
                "No triggers registered for repo '{}' (space '{}')",
                event.repository_key(),
                event.space_name
            );
            return report;
        }

        for job in jobs {
            let outcome = self.handle_binding(&job, event).await;
            report.bindings.push(BindingReport { job, outcome });
        }
        report
    }

    async fn handle_binding(&self, job_id: &JobId, event: &WebhookEvent) -> BindingOutcome {
        let Some(job) = self.catalog.job(job_id) else {
            warn!("Job '{}' is bound but no longer configured", job_id);
            return BindingOutcome::Skipped("job is not configured".to_string());
        };

        if let Decision::Skip(reason) = policy::decide(&job.trigger_config(), event) {
            info!("Not building job '{}': {}", job.name, reason);
            return BindingOutcome::Skipped(reason);
        }

        let api = self.repository_api();
        let cause = match policy::resolve_cause(api.as_ref(), event).await {
            Ok(cause) => cause,
            Err(e) => {
                warn!("Could not resolve cause for job '{}': {}", job.name, e);
                return BindingOutcome::Failed(e.to_string());
            }
        };

        match invoke(self.scheduler.as_ref(), &job, cause).await {
            Ok(handle) => BindingOutcome::Scheduled(handle),
            Err(e) => {
                error!("Build for job '{}' was not scheduled: {}", job.name, e);
                BindingOutcome::Failed(e.to_string())
            }
        }
    }
}
