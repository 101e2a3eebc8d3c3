//! Tests for applying a reloaded configuration to a running service.

use assembla_trigger::assembla::{OfflineRepositoryApi, RepositoryApi, SpaceTool};
use assembla_trigger::dispatch::{BindingOutcome, TriggerService};
use assembla_trigger::error::{Result, TriggerError};
use assembla_trigger::registry::{JobId, TriggerRegistry};
use assembla_trigger::scheduler::LocalScheduler;
use assembla_trigger::{AppState, AssemblaSettings, JobDefinition, SharedState, TriggerSettings};
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Refuses every lookup, standing in for an API with stale credentials.
struct RejectingApi;

#[async_trait]
impl RepositoryApi for RejectingApi {
    async fn authenticate(&self, _key: &str, _secret: &str) -> Result<()> {
        Ok(())
    }

    async fn resolve_repository_tool(&self, _wiki: &str, _repository: &str) -> Result<SpaceTool> {
        Err(TriggerError::UpstreamLookup("401 Unauthorized".to_string()))
    }
}

fn job(name: &str) -> JobDefinition {
    JobDefinition {
        name: name.to_string(),
        space_name: "pavel test".to_string(),
        repo_name: "pavel-test".to_string(),
        ..JobDefinition::default()
    }
}

/// Credentials pointing at a port nothing listens on.
fn unreachable_credentials() -> AssemblaSettings {
    AssemblaSettings {
        api_url: "http://127.0.0.1:9".to_string(),
        bot_api_key: "key".to_string(),
        bot_api_secret: "secret".to_string(),
        request_timeout_secs: 1,
        ..AssemblaSettings::default()
    }
}

fn settings(assembla: AssemblaSettings, jobs: Vec<JobDefinition>) -> TriggerSettings {
    TriggerSettings {
        assembla,
        max_builds: 10,
        jobs,
        ..TriggerSettings::default()
    }
}

fn state(config: TriggerSettings, api: Arc<dyn RepositoryApi>) -> SharedState {
    let registry = Arc::new(TriggerRegistry::new());
    registry.sync(&[], &config.jobs);
    let scheduler = Arc::new(LocalScheduler::new(&config.jobs, config.max_builds));
    let service = TriggerService::new(registry, api, scheduler.clone(), scheduler.clone());

    Arc::new(AppState {
        config: RwLock::new(config),
        config_path: PathBuf::from("trigger_config.toml"),
        service,
        scheduler,
        start_time: Instant::now(),
        started_at: Utc::now(),
    })
}

fn created_merge_request() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "space": "pavel test",
        "message_type": "created merge request",
        "title": "Merge Request 2945043: Fix bug",
        "body": "body",
        "author": "pavel.d",
        "branch": "master",
        "url": "git@git.assembla.com:pavelportfolio^pavel-test.2.git",
        "commit_id": "276dc190"
    }))
    .unwrap()
}

async fn outcomes(state: &SharedState) -> Vec<(JobId, BindingOutcome)> {
    state
        .service
        .handle_payload(&created_merge_request())
        .await
        .unwrap()
        .bindings
        .into_iter()
        .map(|b| (b.job, b.outcome))
        .collect()
}

#[tokio::test]
async fn test_reload_without_credentials_switches_lookups_offline() {
    let state = state(
        settings(unreachable_credentials(), vec![job("web")]),
        Arc::new(RejectingApi),
    );
    let before = outcomes(&state).await;
    assert!(matches!(before[0].1, BindingOutcome::Failed(_)));

    state
        .reload(settings(AssemblaSettings::default(), vec![job("web")]))
        .await
        .unwrap();

    let after = outcomes(&state).await;
    assert_eq!(after.len(), 1);
    assert!(matches!(after[0].1, BindingOutcome::Scheduled(_)));
    assert!(!state.config.read().unwrap().assembla.has_credentials());
}

#[tokio::test]
async fn test_reload_with_unreachable_credentials_is_rejected() {
    let state = state(
        settings(AssemblaSettings::default(), vec![job("web")]),
        Arc::new(OfflineRepositoryApi),
    );

    let err = state
        .reload(settings(unreachable_credentials(), vec![job("web"), job("nightly")]))
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::UpstreamLookup(_)));

    // Nothing from the rejected config was applied.
    let config = state.config.read().unwrap().clone();
    assert!(!config.assembla.has_credentials());
    assert_eq!(config.jobs.len(), 1);
    assert_eq!(state.service.registry().lookup("pavel-test").len(), 1);

    let outcomes = outcomes(&state).await;
    assert!(matches!(outcomes[0].1, BindingOutcome::Scheduled(_)));
}

#[tokio::test]
async fn test_reload_with_unchanged_credentials_keeps_api() {
    let state = state(
        settings(unreachable_credentials(), vec![job("web")]),
        Arc::new(RejectingApi),
    );

    // Same [assembla] table: no reconnect, only the new job is picked up.
    state
        .reload(settings(unreachable_credentials(), vec![job("web"), job("nightly")]))
        .await
        .unwrap();

    let outcomes = outcomes(&state).await;
    assert_eq!(
        outcomes.iter().map(|(job, _)| job.as_str()).collect::<Vec<_>>(),
        vec!["nightly", "web"]
    );
    assert!(
        outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, BindingOutcome::Failed(_)))
    );
}

#[tokio::test]
async fn test_newly_bound_job_is_scheduled_after_reload() {
    let state = state(
        settings(AssemblaSettings::default(), vec![job("web")]),
        Arc::new(OfflineRepositoryApi),
    );

    state.apply_config(settings(AssemblaSettings::default(), vec![job("web"), job("nightly")]));

    let outcomes = outcomes(&state).await;
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, BindingOutcome::Scheduled(_)))
    );
    assert_eq!(state.scheduler.build_count(), 2);
}
