//! Per-binding trigger policy
//!
//! Decides whether a normalized event fires a given job, and resolves the
//! repository tools needed to describe the build in a [`Cause`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::assembla::RepositoryApi;
use crate::cause::Cause;
use crate::error::{Result, TriggerError};
use crate::webhook::{EventKind, MergeRequestAction, WebhookEvent, wiki_name_from_url};

/// Merge request actions a job can opt into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOn {
    Created,
    /// Also covers reopened merge requests.
    Updated,
    Merged,
    Ignored,
}

impl TriggerOn {
    /// Which filter entry an action is governed by; `None` for unknown actions.
    pub fn for_action(action: &MergeRequestAction) -> Option<Self> {
        match action {
            MergeRequestAction::Created => Some(TriggerOn::Created),
            MergeRequestAction::Updated | MergeRequestAction::Reopened => Some(TriggerOn::Updated),
            MergeRequestAction::Merged => Some(TriggerOn::Merged),
            MergeRequestAction::Ignored => Some(TriggerOn::Ignored),
            MergeRequestAction::Unknown(_) => None,
        }
    }
}

/// Set of merge request actions that fire a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFilter(BTreeSet<TriggerOn>);

impl ActionFilter {
    pub fn new(actions: impl IntoIterator<Item = TriggerOn>) -> Self {
        Self(actions.into_iter().collect())
    }

    pub fn only(action: TriggerOn) -> Self {
        Self::new([action])
    }

    pub fn all() -> Self {
        Self::new([
            TriggerOn::Created,
            TriggerOn::Updated,
            TriggerOn::Merged,
            TriggerOn::Ignored,
        ])
    }

    pub fn allows(&self, action: TriggerOn) -> bool {
        self.0.contains(&action)
    }

    pub fn actions(&self) -> impl Iterator<Item = TriggerOn> + '_ {
        self.0.iter().copied()
    }
}

/// Created and updated merge requests fire by default.
impl Default for ActionFilter {
    fn default() -> Self {
        Self::new([TriggerOn::Created, TriggerOn::Updated])
    }
}

/// Trigger settings of one job, read-only at event time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerConfig {
    pub space_name: String,
    pub repo_name: String,
    pub filter: ActionFilter,
    pub build_on_push: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Fire,
    Skip(String),
}

/// Decides whether `event` should fire a job configured with `config`.
pub fn decide(config: &TriggerConfig, event: &WebhookEvent) -> Decision {
    match event.kind {
        EventKind::MergeRequest => {
            let Some(action) = event.action.as_ref() else {
                return Decision::Skip("merge request without action".to_string());
            };
            match TriggerOn::for_action(action) {
                Some(trigger_on) if config.filter.allows(trigger_on) => Decision::Fire,
                Some(_) => {
                    debug!(
                        "Action '{}' not enabled for repo '{}'",
                        action, config.repo_name
                    );
                    Decision::Skip(format!("action '{}' is not enabled", action))
                }
                None => {
                    warn!(
                        "Unrecognized merge request action '{}' for repo '{}', not building",
                        action, config.repo_name
                    );
                    Decision::Skip(format!("unrecognized action '{}'", action))
                }
            }
        }
        EventKind::Changeset if config.build_on_push => Decision::Fire,
        EventKind::Changeset => Decision::Skip("push builds are disabled".to_string()),
        EventKind::Other => Decision::Skip("event is neither merge request nor changeset".to_string()),
    }
}

/// Resolves the repository tools of `event` and builds its cause.
pub async fn resolve_cause(api: &dyn RepositoryApi, event: &WebhookEvent) -> Result<Cause> {
    let target_tool = api
        .resolve_repository_tool(&event.space_wiki_name, &event.repository_url)
        .await?;

    match event.kind {
        EventKind::MergeRequest => {
            let source_url = event.source_repository_url();
            let source_tool = if source_url == event.repository_url {
                target_tool.clone()
            } else {
                let source_wiki = wiki_name_from_url(source_url)
                    .unwrap_or_else(|| event.space_wiki_name.clone());
                api.resolve_repository_tool(&source_wiki, source_url).await?
            };

            Cause::from_merge_request(event, &source_tool, &target_tool).ok_or_else(|| {
                TriggerError::malformed("merge request event without id or action")
            })
        }
        EventKind::Changeset => Ok(Cause::from_push(event, &target_tool)),
        EventKind::Other => Err(TriggerError::malformed(
            "cannot build a cause for an event that is neither merge request nor changeset",
        )),
    }
}
