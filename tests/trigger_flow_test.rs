//! End-to-end tests of the trigger engine: payload in, scheduling calls out.

use assembla_trigger::JobDefinition;
use assembla_trigger::assembla::{OfflineRepositoryApi, RepositoryApi, SpaceTool};
use assembla_trigger::cause::Cause;
use assembla_trigger::dispatch::{BindingOutcome, TriggerService};
use assembla_trigger::error::{Result, TriggerError};
use assembla_trigger::invoke::{DESCRIPTION_PARAM, MERGE_REQUEST_ID_PARAM, ParameterSet};
use assembla_trigger::policy::TriggerOn;
use assembla_trigger::registry::{JobId, TriggerRegistry};
use assembla_trigger::scheduler::{BuildHandle, BuildScheduler, JobCatalog};
use assembla_trigger::webhook::MergeRequestAction;
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const REPO_URL: &str = "git@git.assembla.com:pavelportfolio^pavel-test.2.git";

struct ScheduledCall {
    job: JobId,
    quiet_period_secs: u64,
    cause: Cause,
    parameters: ParameterSet,
}

/// Records every scheduling call; rejects jobs listed in `rejected`.
#[derive(Default)]
struct RecordingScheduler {
    jobs: Vec<JobDefinition>,
    rejected: HashSet<JobId>,
    calls: Mutex<Vec<ScheduledCall>>,
}

impl RecordingScheduler {
    fn new(jobs: Vec<JobDefinition>) -> Self {
        Self {
            jobs,
            ..Self::default()
        }
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Vec<ScheduledCall>> {
        self.calls.lock().unwrap()
    }
}

impl JobCatalog for RecordingScheduler {
    fn job(&self, id: &JobId) -> Option<JobDefinition> {
        self.jobs.iter().find(|j| &j.id() == id).cloned()
    }
}

#[async_trait]
impl BuildScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        job: &JobId,
        quiet_period_secs: u64,
        cause: Cause,
        parameters: ParameterSet,
    ) -> Result<BuildHandle> {
        if self.rejected.contains(job) {
            return Err(TriggerError::scheduling(job.as_str(), "job is disabled"));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(ScheduledCall {
            job: job.clone(),
            quiet_period_secs,
            cause,
            parameters,
        });
        Ok(BuildHandle {
            build_id: format!("build-{}", calls.len()),
            job: job.clone(),
            not_before: Utc::now(),
        })
    }
}

/// Fails the first `failures` lookups, then answers like the offline API.
struct FlakyApi {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RepositoryApi for FlakyApi {
    async fn authenticate(&self, _key: &str, _secret: &str) -> Result<()> {
        Ok(())
    }

    async fn resolve_repository_tool(
        &self,
        space_wiki_name: &str,
        repository: &str,
    ) -> Result<SpaceTool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(TriggerError::UpstreamLookup("connection reset".to_string()));
        }
        OfflineRepositoryApi
            .resolve_repository_tool(space_wiki_name, repository)
            .await
    }
}

fn job(name: &str, trigger_on: &[TriggerOn]) -> JobDefinition {
    JobDefinition {
        name: name.to_string(),
        space_name: "pavel test".to_string(),
        repo_name: "pavel-test".to_string(),
        trigger_on: trigger_on.to_vec(),
        ..JobDefinition::default()
    }
}

fn payload(message_type: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "space": { "name": "pavel test", "id": "space-1" },
        "message_type": message_type,
        "title": "Merge Request 2945043: Fix bug",
        "body": "pavel.d updated Merge Request 2945043",
        "author": "pavel.d",
        "branch": "feature",
        "target_branch": "master",
        "url": REPO_URL,
        "commit_id": "276dc190d87eff3d28fdfad2d1e6a08a672efe13"
    }))
    .unwrap()
}

fn service_with(
    jobs: Vec<JobDefinition>,
    scheduler: Arc<RecordingScheduler>,
    api: Arc<dyn RepositoryApi>,
) -> TriggerService {
    let registry = Arc::new(TriggerRegistry::new());
    registry.sync(&[], &jobs);
    TriggerService::new(registry, api, scheduler.clone(), scheduler)
}

fn service(jobs: Vec<JobDefinition>) -> (TriggerService, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::new(jobs.clone()));
    let service = service_with(jobs, scheduler.clone(), Arc::new(OfflineRepositoryApi));
    (service, scheduler)
}

#[tokio::test]
async fn test_updated_merge_request_schedules_build() {
    let (service, scheduler) = service(vec![job("web", &[TriggerOn::Created, TriggerOn::Updated])]);

    let report = service
        .handle_payload(&payload("updated merge request"))
        .await
        .unwrap();

    assert_eq!(report.space_wiki_name, "pavel-test");
    assert_eq!(report.action.as_deref(), Some("updated"));
    assert_eq!(report.scheduled_count(), 1);

    let calls = scheduler.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.job, JobId::new("web"));
    assert_eq!(call.quiet_period_secs, 0);
    assert_eq!(call.cause.merge_request_id(), Some(2945043));
    assert_eq!(call.cause.action(), Some(&MergeRequestAction::Updated));
    assert_eq!(call.parameters[MERGE_REQUEST_ID_PARAM], "2945043");
    assert_eq!(call.parameters["assemblaSourceSpaceId"], "space-1");
    assert_eq!(call.parameters["assemblaSourceBranch"], "feature");
    assert_eq!(call.parameters["assemblaTargetBranch"], "master");
}

#[tokio::test]
async fn test_merged_only_binding_fires_once() {
    let (service, scheduler) = service(vec![job("release", &[TriggerOn::Merged])]);

    for action in ["merged", "ignored", "created"] {
        service
            .handle_payload(&payload(&format!("{} merge request", action)))
            .await
            .unwrap();
    }

    let calls = scheduler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cause.action(), Some(&MergeRequestAction::Merged));
}

#[tokio::test]
async fn test_ignored_only_binding_fires_once() {
    let (service, scheduler) = service(vec![job("cleanup", &[TriggerOn::Ignored])]);

    for action in ["merged", "ignored", "created"] {
        service
            .handle_payload(&payload(&format!("{} merge request", action)))
            .await
            .unwrap();
    }

    let calls = scheduler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cause.action(), Some(&MergeRequestAction::Ignored));
}

#[tokio::test]
async fn test_cause_description_overrides_default_even_when_empty() {
    let mut web = job("web", &[TriggerOn::Updated]);
    web.parameters = BTreeMap::from([
        (DESCRIPTION_PARAM.to_string(), "x".to_string()),
        ("DEPLOY".to_string(), "false".to_string()),
    ]);
    let (service, scheduler) = service(vec![web]);

    service
        .handle_payload(&payload("updated merge request"))
        .await
        .unwrap();

    let calls = scheduler.calls();
    assert_eq!(calls[0].parameters[DESCRIPTION_PARAM], "");
    assert_eq!(calls[0].parameters["DEPLOY"], "false");
}

#[tokio::test]
async fn test_upstream_failure_only_affects_one_binding() {
    let jobs = vec![
        job("a-first", &[TriggerOn::Updated]),
        job("b-second", &[TriggerOn::Updated]),
    ];
    let scheduler = Arc::new(RecordingScheduler::new(jobs.clone()));
    let api = Arc::new(FlakyApi {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let service = service_with(jobs, scheduler.clone(), api);

    let report = service
        .handle_payload(&payload("updated merge request"))
        .await
        .unwrap();

    assert_eq!(report.bindings.len(), 2);
    assert_eq!(report.bindings[0].job, JobId::new("a-first"));
    assert!(matches!(report.bindings[0].outcome, BindingOutcome::Failed(_)));
    assert_eq!(report.bindings[1].job, JobId::new("b-second"));
    assert!(matches!(report.bindings[1].outcome, BindingOutcome::Scheduled(_)));
    assert_eq!(scheduler.calls().len(), 1);
}

#[tokio::test]
async fn test_rejected_build_does_not_block_siblings() {
    let jobs = vec![
        job("a-disabled", &[TriggerOn::Updated]),
        job("b-enabled", &[TriggerOn::Updated]),
    ];
    let scheduler = Arc::new(RecordingScheduler {
        jobs: jobs.clone(),
        rejected: HashSet::from([JobId::new("a-disabled")]),
        ..RecordingScheduler::default()
    });
    let service = service_with(jobs, scheduler.clone(), Arc::new(OfflineRepositoryApi));

    let report = service
        .handle_payload(&payload("updated merge request"))
        .await
        .unwrap();

    assert!(matches!(report.bindings[0].outcome, BindingOutcome::Failed(_)));
    assert!(matches!(report.bindings[1].outcome, BindingOutcome::Scheduled(_)));
    assert_eq!(scheduler.calls().len(), 1);
    assert_eq!(scheduler.calls()[0].job, JobId::new("b-enabled"));
}

#[tokio::test]
async fn test_push_event_builds_when_enabled() {
    let mut quiet = job("push-build", &[]);
    quiet.quiet_period_secs = 5;
    let mut no_push = job("mr-only", &[TriggerOn::Created]);
    no_push.build_on_push = false;
    let (service, scheduler) = service(vec![quiet, no_push]);

    let report = service
        .handle_payload(&payload("committed changeset"))
        .await
        .unwrap();

    assert_eq!(report.bindings.len(), 2);
    let calls = scheduler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].job, JobId::new("push-build"));
    assert_eq!(calls[0].quiet_period_secs, 5);
    assert!(matches!(calls[0].cause, Cause::Push { .. }));
    assert_eq!(calls[0].parameters[MERGE_REQUEST_ID_PARAM], "");
}

#[tokio::test]
async fn test_unknown_action_is_dropped_quietly() {
    let (service, scheduler) = service(vec![job("web", &[TriggerOn::Created])]);

    let report = service
        .handle_payload(&payload("commented merge request"))
        .await
        .unwrap();

    assert!(report.bindings.is_empty());
    assert!(scheduler.calls().is_empty());
}

#[tokio::test]
async fn test_unbound_repository_schedules_nothing() {
    let mut elsewhere = job("web", &[TriggerOn::Updated]);
    elsewhere.repo_name = "other-repo".to_string();
    let (service, scheduler) = service(vec![elsewhere]);

    let report = service
        .handle_payload(&payload("updated merge request"))
        .await
        .unwrap();

    assert!(report.bindings.is_empty());
    assert!(scheduler.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let (service, scheduler) = service(vec![job("web", &[TriggerOn::Updated])]);

    let err = service
        .handle_payload(br#"{"message_type": "updated merge request"}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::MalformedPayload(_)));
    assert!(scheduler.calls().is_empty());
}

#[tokio::test]
async fn test_fork_merge_request() {
    let (service, scheduler) = service(vec![job("web", &[TriggerOn::Created])]);
    let mut body: serde_json::Value = serde_json::from_slice(&payload("created merge request")).unwrap();
    body["source_repository_url"] = json!("git@git.assembla.com:someone^pavel-test-fork.git");

    service
        .handle_payload(&serde_json::to_vec(&body).unwrap())
        .await
        .unwrap();

    let calls = scheduler.calls();
    assert!(calls[0].cause.is_from_fork());
    assert_eq!(calls[0].parameters["assemblaSourceRepository"], "pavel-test-fork");
}
